//! `switchyard chat`: single-message or interactive chat.

use std::io::Write;

use switchyard_agent::StreamEvent;
use switchyard_core::ConversationId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::runtime::{Runtime, load_config};

pub struct ChatOptions {
    pub message: Option<String>,
    pub conversation: Option<String>,
    pub caller: String,
    pub background: bool,
    pub stream: bool,
}

impl ChatOptions {
    fn context_hint(&self) -> Option<&str> {
        self.background.then_some("background")
    }
}

pub async fn run(options: ChatOptions) -> anyhow::Result<()> {
    let config = load_config()?;
    if config.api_key.is_none() && config.providers.values().all(|p| p.api_key.is_none()) {
        eprintln!("  No API key configured. Set SWITCHYARD_API_KEY, OPENROUTER_API_KEY or");
        eprintln!("  OPENAI_API_KEY, or add one to the [providers] section of your config.");
        anyhow::bail!("no API key found");
    }

    let runtime = Runtime::build(config).await?;
    let conversation = options
        .conversation
        .as_deref()
        .map(ConversationId::from)
        .unwrap_or_default();

    if runtime.config.supervisor.enabled {
        let supervisor = runtime.supervisor.clone();
        tokio::spawn(async move { supervisor.run().await });
    }

    if let Some(message) = &options.message {
        let reply = send(&runtime, &conversation, message, &options).await;
        if !options.stream {
            println!("{reply}");
        }
        return Ok(());
    }

    println!();
    println!("  Switchyard interactive chat");
    println!("  Conversation: {conversation}");
    println!("  Type 'exit' or press Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let reply = send(&runtime, &conversation, line, &options).await;
        if !options.stream {
            println!();
            for l in reply.lines() {
                println!("  Assistant > {l}");
            }
        }
        println!();
    }

    Ok(())
}

async fn send(
    runtime: &Runtime,
    conversation: &ConversationId,
    message: &str,
    options: &ChatOptions,
) -> String {
    let orchestrator = &runtime.orchestrator;
    if !options.stream {
        return orchestrator
            .handle_request(conversation, message, &options.caller, options.context_hint())
            .await;
    }

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut printed = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Chunk { content } => {
                    print!("{content}");
                    let _ = std::io::stdout().flush();
                    printed = true;
                }
                StreamEvent::SwitchedToChain { .. } => {
                    if printed {
                        println!();
                        println!("  (working with tools...)");
                    }
                    printed = false;
                }
                StreamEvent::Done { text } => {
                    if !printed {
                        print!("{text}");
                    }
                    println!();
                }
            }
        }
    });

    let reply = orchestrator
        .handle_request_stream(conversation, message, &options.caller, options.context_hint(), tx)
        .await;
    let _ = printer.await;
    reply
}
