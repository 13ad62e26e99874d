//! Watch one or more channels on the PubSub edge.
//!
//! ```sh
//! cargo run -p twitch-realtime --example watch -- <CHANNEL> [CHANNEL...]
//! ```
//!
//! With `TWITCH_AUTH_TOKEN` set, the first channel's bits events are
//! requested too (the channel must be given as its numeric id for that).
//! Notifications are printed to stdout, lifecycle events to stderr.

use twitch_realtime::{Event, Notification, Realtime, RealtimeConfig, TopicType};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let channels: Vec<String> = std::env::args().skip(1).collect();
    if channels.is_empty() {
        return Err("usage: watch <CHANNEL> [CHANNEL...]".into());
    }

    let mut config = RealtimeConfig::new(
        channels
            .iter()
            .map(|c| TopicType::VideoPlayback.topic(c)),
    );
    config.auth_token = std::env::var("TWITCH_AUTH_TOKEN").ok();
    let has_token = config.auth_token.is_some();

    eprintln!("watching {} channel(s) ...", channels.len());
    let mut realtime = Realtime::new(config)?;

    let mut requested_bits = false;
    while let Some(event) = realtime.next().await {
        match event {
            Event::Connect => {
                eprintln!("[connect] topics={}", realtime.topic_count());
                if has_token
                    && !requested_bits
                    && let Some(first) = channels.first()
                {
                    requested_bits = true;
                    let topic = TopicType::Bits.topic(first);
                    match realtime.listen(topic.as_str(), None).await {
                        Ok(()) => eprintln!("[listen] {topic}"),
                        Err(e) => eprintln!("[listen] {topic} failed: {e}"),
                    }
                }
            }
            Event::Close { will_reconnect } => {
                eprintln!("[close] will_reconnect={will_reconnect}");
            }
            Event::Notification(n) => match n {
                Notification::ViewCount(v) => println!("{} viewers={}", v.channel, v.viewers),
                Notification::StreamUp(up) => {
                    println!("{} stream-up delay={:?}", up.channel, up.play_delay)
                }
                Notification::Bits(b) => println!(
                    "{} bits={} from={}",
                    b.channel,
                    b.bits_used,
                    b.user_name.as_deref().unwrap_or("-")
                ),
                other => println!("{} {}", other.channel(), other.name()),
            },
            Event::Warn(w) => eprintln!("[warn] {w}"),
            Event::Error { context, detail } => eprintln!("[error] {context}: {detail}"),
            Event::Raw(_) | Event::Debug(_) => {}
        }
    }

    Ok(())
}
