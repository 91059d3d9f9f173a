//! Greeter Example
//!
//! A handful of handlers showing the ways a slackhive bot can match and
//! reply:
//!
//! - phrase conditions (`hello`, `hi`) with a text reply
//! - a regular expression with an async action
//! - AND-combined conditions restricted to one channel
//! - a structured payload reply with an attachment
//! - a direct-message reply and a stream-routed reply
//!
//! # Usage
//!
//! ```bash
//! SLACK_TOKEN=xoxb-... cargo run --package greeter -- --config greeter.toml
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use regex::Regex;
use serde_json::json;
use slackhive::prelude::*;
use tracing::info;

/// Command-line options.
#[derive(Parser, Debug)]
#[command(name = "greeter", about = "Example slackhive handlers")]
struct Args {
    /// Configuration file; searched for in the working directory when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production or a custom name).
    #[arg(short, long)]
    profile: Option<String>,

    /// Bot token, overriding every other source.
    #[arg(long, env = "GREETER_TOKEN")]
    token: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Greets anyone who says hello.
fn greeter() -> Handler {
    Handler::new("greeter")
        .phrase("hello")
        .phrase("hi")
        .reply(|event| format!("Hello, {}!", event.user_name()))
}

/// Echoes text after `echo`, posted as a plain stream message.
fn echo() -> Result<Handler> {
    let pattern = Regex::new(r"^echo\s+(.+)$")?;
    let extract = pattern.clone();

    Ok(Handler::new("echo")
        .pattern(pattern)
        .route(Route::Stream)
        .reply(move |event| {
            extract
                .captures(event.text())
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        }))
}

/// Pretends to deploy, only in `#ops`.
fn deployer() -> Result<Handler> {
    Ok(Handler::new("deployer")
        .all()
        .pattern(Regex::new(r"^deploy [\w-]+$")?)
        .when(|event| event.channel_name() == "ops")
        .username("deploybot")
        .icon_emoji(":rocket:")
        .concurrency(1)
        .timeout(Duration::from_secs(30))
        .action(|event| async move {
            let target = event.text().trim_start_matches("deploy ").to_string();
            if target == "production" {
                return Err(HandlerError::custom("production deploys are frozen"));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Reply::from(format!("deployed {target}")))
        }))
}

/// Replies with a structured card.
fn status() -> Handler {
    Handler::new("status").phrase("status report").reply(|event| {
        json!({
            "text": "All systems nominal",
            "attachments": [{
                "color": "good",
                "fields": [
                    { "title": "Channel", "value": event.channel_name(), "short": true },
                    { "title": "Asked by", "value": event.user_name(), "short": true },
                ],
            }],
        })
    })
}

/// Answers help requests privately.
fn help() -> Handler {
    Handler::new("help")
        .phrase("help")
        .reply_to(ReplyTo::DirectMessage)
        .text(
            "I know: hello, echo <text>, deploy <target> (in #ops), status report, help",
        )
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = HiveRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile.as_str());
    }
    if let Some(token) = &args.token {
        builder = builder.set("slack.token", token);
    }
    let runtime = builder.build()?;

    let ids = runtime.register_all([greeter(), echo()?, deployer()?, status(), help()]);
    info!(handlers = ids.len(), "Handlers registered");

    runtime.run().await?;
    Ok(())
}
