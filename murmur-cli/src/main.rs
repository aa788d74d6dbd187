mod client;
mod conversation;
mod input;

use anyhow::Result;
use clap::Parser;
use client::BackendClient;
use conversation::{Conversation, Reply};
use futures_util::StreamExt;
use input::{next_input, Input};
use murmur_shared::{ErrorKind, StreamEvent};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "murmur", about = "Chat with a murmur relay server")]
struct Args {
    /// Base URL of the relay server
    #[arg(long, env = "MURMUR_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    /// System prompt sent at the start of every conversation
    #[arg(long)]
    system: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = BackendClient::new(&args.url);
    let mut conversation = Conversation::new(args.system);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Connected to {} (/clear resets, /quit or Ctrl-C at the prompt exits, Ctrl-C stops a reply)", args.url);
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        match next_input(&mut lines, tokio::signal::ctrl_c()).await? {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Interrupted => {
                println!();
                // The stdin reader thread is still blocked on the read and
                // would hold up runtime shutdown until the next Enter.
                std::process::exit(0);
            }
            Input::Clear => {
                conversation.clear();
                println!("(history cleared)");
                continue;
            }
            Input::Message(text) => conversation.push_user(text),
        }

        // Input is not read again until this reply is finished.
        let reply = exchange(&client, &conversation).await;
        conversation.record_reply(reply);
    }

    Ok(())
}

async fn exchange(client: &BackendClient, conversation: &Conversation) -> Reply {
    let mut reply = Reply::default();
    let request = conversation.request();

    let events = match client.stream_chat(&request).await {
        Ok(events) => events,
        Err(e) => {
            error!("Request failed: {:#}", e);
            println!("[error] {:#}", e);
            return reply;
        }
    };
    let mut events = std::pin::pin!(events);
    let mut stdout = std::io::stdout();

    loop {
        let next = tokio::select! {
            next = events.next() => next,
            _ = tokio::signal::ctrl_c() => {
                debug!("Reply interrupted by user");
                println!("\n[stopped]");
                return reply;
            }
        };

        match next {
            Some(Ok(event)) => {
                if let Some(delta) = reply.apply(event) {
                    print!("{}", delta);
                    let _ = stdout.flush();
                }
            }
            Some(Err(e)) => {
                warn!("Stream failed: {:#}", e);
                println!("\n[error] {:#}", e);
                return reply;
            }
            None => break,
        }
        if reply.is_finished() {
            break;
        }
    }

    match &reply.terminal {
        Some(StreamEvent::Done) => println!(),
        Some(StreamEvent::Error { kind, message, started }) => {
            if *started {
                println!();
            }
            match kind {
                ErrorKind::InvalidRequest | ErrorKind::ProviderRejected => {
                    println!("[no response: {}] {}", kind, message)
                }
                _ => println!("[reply interrupted: {}] {}", kind, message),
            }
        }
        Some(StreamEvent::TextDelta { .. }) | None => {
            println!("\n[error] server closed the stream without finishing the reply")
        }
    }
    reply
}
