use charon_console::active_view::CharonMode;
use charon_console::api;
use charon_console::config::Config;
use charon_console::AppState;
use std::io::{self, BufRead, Write};
use tracing::info;

const HELP: &str = "\
commands:
  channels                      per-channel overview
  log <channel>                 show a channel's conversation
  say <channel> <text>          submit a player query
  draft <channel> <prompt>      GM-initiated draft (no user message)
  pending <channel>             list drafts awaiting approval
  approve <channel> <id> [text] approve a draft, optionally edited
  reject <channel> <id>         discard a draft
  read <channel>                mark a channel read
  clear <channel>               wipe a channel's conversation
  mode <query|display>          toggle the CHARON interaction mode
  location <path>               set CHARON's configured location path
  reload                        drop cached responders (re-read files)
  status                        show the active responder's identity
  quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let state = AppState::new(config);
    info!("CHARON GM console ready");
    println!("CHARON GM console. Type 'help' for commands.");

    let stdin = io::stdin();
    loop {
        print!("gm> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let mut parts = line.trim().splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match command {
            "" => {}
            "help" => println!("{}", HELP),
            "quit" | "exit" => break,
            "channels" => {
                for summary in api::channel_overview(&state) {
                    println!(
                        "{:20} {:3} msgs  {:2} pending  {:2} unread",
                        summary.channel,
                        summary.message_count,
                        summary.pending_count,
                        summary.unread_count
                    );
                }
            }
            "log" => {
                for msg in state.sessions.conversation(rest) {
                    println!("[{}] {:?}: {}", msg.timestamp, msg.role, msg.content);
                }
            }
            "say" => {
                let (channel, text) = split_arg(rest);
                match api::submit_query(&state, channel, text).await {
                    Ok(outcome) => println!("queued pending {}", outcome.pending_id),
                    Err(e) => println!("rejected: {}", e),
                }
            }
            "draft" => {
                let (channel, prompt) = split_arg(rest);
                match api::generate_draft(&state, channel, prompt, None).await {
                    Ok(pending_id) => println!("queued pending {}", pending_id),
                    Err(e) => println!("rejected: {}", e),
                }
            }
            "pending" => {
                for item in state.sessions.pending(rest) {
                    println!("{}\n  query: {}\n  draft: {}", item.pending_id, item.query, item.response);
                }
            }
            "approve" => {
                let (channel, rest) = split_arg(rest);
                let (id, edited) = split_arg(rest);
                let modified = (!edited.is_empty()).then_some(edited);
                match api::approve(&state, channel, id, modified) {
                    Ok(()) => println!("approved"),
                    Err(e) => println!("rejected: {}", e),
                }
            }
            "reject" => {
                let (channel, id) = split_arg(rest);
                match api::reject(&state, channel, id) {
                    Ok(()) => println!("discarded"),
                    Err(e) => println!("rejected: {}", e),
                }
            }
            "read" => api::mark_channel_read(&state, rest, None),
            "clear" => api::clear_channel(&state, rest),
            "mode" => {
                let mode = match rest {
                    "query" => CharonMode::Query,
                    _ => CharonMode::Display,
                };
                state.active_view.update(|s| s.charon_mode = mode);
                println!("charon mode: {:?}", mode);
            }
            "location" => {
                state
                    .active_view
                    .update(|s| s.charon_location_path = rest.to_string());
                api::clear_responders(&state);
                println!("charon location: {}", rest);
            }
            "reload" => api::clear_responders(&state),
            "status" => {
                let view = state.active_view.snapshot();
                let location = (!view.charon_location_path.is_empty())
                    .then_some(view.charon_location_path.as_str());
                let responder =
                    state
                        .responders
                        .get_or_build(&state.config, &state.locations, location);
                let info = responder.describe();
                println!(
                    "{} ({}) v{} | AI {}",
                    info.name,
                    info.designation,
                    info.version,
                    if info.ai_available { "online" } else { "offline" }
                );
            }
            other => println!("unknown command '{}' (try 'help')", other),
        }
    }

    Ok(())
}

fn split_arg(input: &str) -> (&str, &str) {
    match input.split_once(' ') {
        Some((head, tail)) => (head, tail.trim()),
        None => (input, ""),
    }
}
