//! Interactive chat application for conversing with Spark.
//!
//! This binary provides a streaming REPL over the Spark chat service.  The
//! conversation history is kept for the whole session and sent with every
//! question.
//!
//! # Usage
//!
//! ```bash
//! # Credentials come from the environment
//! export SPARK_API_KEY=... SPARK_API_SECRET=... SPARK_APP_ID=...
//!
//! # Basic usage with default settings
//! spark-chat
//!
//! # Specify a model and temperature
//! spark-chat --model max --temperature 0.2
//!
//! # Print whole answers without colors (useful for piping output)
//! spark-chat --no-stream --no-color
//! ```
//!
//! Set `RUST_LOG=sparkle=debug` to watch fragments arrive.
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/clear` - Clear conversation history
//! - `/history` - Show the conversation so far
//! - `/model <name>` - Change the model
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use sparkle::chat::{ChatArgs, ChatCommand, ChatConfig, help_text, parse_command};
use sparkle::{ModelType, PlainTextRenderer, Role, SharedRenderer, Spark, shared};

/// Main entry point for the spark-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("spark-chat [OPTIONS]");
    let config = ChatConfig::try_from(args)?;
    let renderer: SharedRenderer = shared(PlainTextRenderer::with_color(config.use_color));
    let mut client = Spark::new(config.spark.clone())?.with_output(renderer.clone());
    let mut stream_output = config.spark.stream_output;
    let mut rl = DefaultEditor::new()?;

    println!("Spark Chat (model: {})", config.model);
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            client.clear_history();
                            info(&renderer, "Conversation cleared.");
                        }
                        ChatCommand::History => {
                            print_history(&client);
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::Model(model) => match client.set_endpoint(model.endpoint()) {
                            Ok(()) => info(&renderer, &format!("Model changed to: {}", model)),
                            Err(err) => error(&renderer, &err.to_string()),
                        },
                        ChatCommand::ListModels => {
                            println!("    Known models:");
                            for model in ModelType::ALL {
                                println!("      {:<10} {}", model.to_string(), model.endpoint());
                            }
                        }
                        ChatCommand::Temperature(value) => match client.set_temperature(value) {
                            Ok(()) => info(&renderer, &format!("temperature set to {:.2}", value)),
                            Err(err) => error(&renderer, &err.to_string()),
                        },
                        ChatCommand::Stream(on) => {
                            stream_output = on;
                            client.set_stream_output(on);
                            if on {
                                info(&renderer, "Streaming output enabled.");
                            } else {
                                info(&renderer, "Streaming output disabled.");
                            }
                        }
                        ChatCommand::Stats => {
                            print_stats(&client);
                        }
                        ChatCommand::ShowConfig => {
                            print_config(&client, stream_output);
                        }
                        ChatCommand::Invalid(message) => {
                            error(&renderer, &message);
                        }
                    }
                    continue;
                }

                // Regular message: the client writes the answer to the renderer.
                println!("Spark:");
                tokio::select! {
                    result = client.send_message(line) => {
                        if let Err(err) = result {
                            error(&renderer, &err.to_string());
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        error(&renderer, "interrupted");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                error(&renderer, &format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

fn info(renderer: &SharedRenderer, message: &str) {
    if let Ok(mut renderer) = renderer.lock() {
        renderer.print_info(message);
    }
}

fn error(renderer: &SharedRenderer, message: &str) {
    if let Ok(mut renderer) = renderer.lock() {
        renderer.print_error(message);
    }
}

fn print_history(client: &Spark) {
    let history = client.history();
    if history.is_empty() {
        println!("    (no conversation yet)");
        return;
    }
    for turn in history {
        let speaker = match turn.role {
            Role::User => "You",
            Role::Assistant => "Spark",
        };
        println!("    {speaker}: {}", turn.content);
    }
}

fn print_stats(client: &Spark) {
    let stats = client.stats();
    println!("    Session Statistics:");
    println!("      Model: {}", client.endpoint().domain);
    println!("      Turns: {}", client.history().len());
    println!(
        "      Exchanges: {} ({} answered)",
        stats.exchanges, stats.completed
    );
    println!("      Fragments (last exchange): {}", stats.last_fragments);
    println!("      Fragments (total): {}", stats.total_fragments);
}

fn print_config(client: &Spark, stream_output: bool) {
    let chat = client.chat_parameter();
    println!("    Current Configuration:");
    println!("      Endpoint: {}", client.endpoint());
    println!("      Max tokens: {}", chat.max_tokens);
    println!("      Temperature: {:.2}", chat.temperature);
    println!("      Timeout: {:?}", client.timeout());
    println!(
        "      Streaming output: {}",
        if stream_output { "on" } else { "off" }
    );
}
