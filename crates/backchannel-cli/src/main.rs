mod commands;
mod render;

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use backchannel_client::{App, AppEvent, ChatUpdate, ChannelChange, SessionStore};
use backchannel_db::ProviderConfig;
use backchannel_types::models::Attachment;

use commands::Command;

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs on stderr, chat on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backchannel=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ProviderConfig::from_env();
    let provider = config.connect_client().await?;
    let session = SessionStore::open(config.local_dir.join("session.json"))?;

    let mut app = App::start(provider.repo, provider.feed, session).await?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if app.username().is_none() && !prompt_sign_in(&mut app, &mut input).await? {
        return Ok(());
    }
    println!("Signed in as {}. Type /help for commands.", app.username().unwrap_or("?"));
    print_channel(&app);
    print_notices(&mut app);

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                let keep_going = match commands::parse(&line) {
                    Ok(Some(command)) => run(&mut app, command).await,
                    Ok(None) => true,
                    Err(e) => {
                        println!("{}", e);
                        true
                    }
                };
                print_notices(&mut app);
                if !keep_going {
                    break;
                }
            }
            event = app.next_event() => {
                let Some(event) = event else {
                    println!("Live updates stopped; the connection was closed.");
                    break;
                };
                print_event(&app, &event);
            }
        }
    }

    info!("Client exiting");
    Ok(())
}

async fn prompt_sign_in(app: &mut App, input: &mut Input) -> anyhow::Result<bool> {
    loop {
        println!("Enter a username:");
        let Some(line) = input.next_line().await? else {
            return Ok(false);
        };
        match app.sign_in(&line).await {
            Ok(()) => return Ok(true),
            Err(e) => println!("{}", e),
        }
    }
}

/// Execute one command. Returns false when the client should exit.
async fn run(app: &mut App, command: Command) -> bool {
    match command {
        Command::Say(text) => {
            if require_user(app) {
                app.send(&text).await;
            }
        }
        Command::Send => {
            if require_user(app) {
                app.send("").await;
            }
        }
        Command::Attach(path) => attach(app, &path).await,
        Command::Clear => app.clear_file(),
        Command::React { index, emoji } => {
            let target = app
                .chat()
                .and_then(|chat| chat.messages().get(index - 1))
                .map(|m| m.id);
            match target {
                Some(id) => {
                    app.react(id, &emoji).await;
                }
                None => println!("No message #{}", index),
            }
        }
        Command::Channels => {
            println!("{}", render::channels(app.channels().channels(), app.channels().selected()));
        }
        Command::Join(name) => match app.channels().find_by_name(&name).map(|c| c.id) {
            Some(id) => {
                app.select_channel(id).await;
                print_channel(app);
            }
            None => println!("No channel named '{}'", name),
        },
        Command::Create(name) => {
            if app.create_channel(&name).await {
                print_channel(app);
            }
        }
        Command::Delete(name) => match app.channels().find_by_name(&name).map(|c| c.id) {
            Some(id) => {
                if app.delete_channel(id).await {
                    println!("Deleted #{}", name);
                    print_channel(app);
                }
            }
            None => println!("No channel named '{}'", name),
        },
        Command::Nick(name) => match app.sign_in(&name).await {
            Ok(()) => println!("Signed in as {}", app.username().unwrap_or(&name)),
            Err(e) => println!("{}", e),
        },
        Command::SignOut => match app.sign_out() {
            Ok(()) => println!("Signed out. Use /nick <name> to sign in."),
            Err(e) => println!("{}", e),
        },
        Command::Check => check_storage(app).await,
        Command::TestUpload => match app.repo().test_upload().await {
            Ok(uploaded) => println!("Test upload stored at {} ({})", uploaded.path, uploaded.url),
            Err(e) => println!("Test upload failed: {}", e),
        },
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => return false,
    }
    true
}

fn require_user(app: &App) -> bool {
    if app.username().is_none() {
        println!("Sign in first with /nick <name>");
        return false;
    }
    true
}

async fn attach(app: &mut App, path: &Path) {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Reading {} failed: {}", path.display(), e);
            println!("Cannot read {}: {}", path.display(), e);
            return;
        }
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let content_type = mime_guess::from_path(path).first_or_octet_stream().to_string();

    app.select_file(Attachment::new(name, content_type, data));
}

async fn check_storage(app: &App) {
    match app.repo().check_storage().await {
        Ok(report) => {
            println!("Buckets: {}", report.buckets.join(", "));
            if report.bucket_found {
                println!("Bucket '{}' holds {} object(s)", report.bucket, report.objects.len());
                for object in &report.objects {
                    println!("  {}", object);
                }
            } else {
                println!("Bucket '{}' not found", report.bucket);
            }
        }
        Err(e) => println!("Storage check failed: {}", e),
    }
}

fn print_channel(app: &App) {
    let Some(channel) = app.channels().selected_channel() else {
        println!("No channel selected. Use /create <name> or /join <name>.");
        return;
    };
    println!("-- #{} --", channel.name);
    if let Some(chat) = app.chat() {
        for (i, message) in chat.messages().iter().enumerate() {
            println!("{}", render::message(i + 1, message));
        }
    }
}

fn print_event(app: &App, event: &AppEvent) {
    match event {
        AppEvent::Channels(ChannelChange::Added(channel)) => println!("Channel #{} was created", channel.name),
        AppEvent::Channels(ChannelChange::Removed(_)) => {
            println!("A channel was deleted");
            print_channel(app);
        }
        AppEvent::Chat(ChatUpdate::Message(id)) => {
            let Some(chat) = app.chat() else { return };
            if let Some((i, message)) = chat.messages().iter().enumerate().find(|(_, m)| m.id == *id) {
                println!("{}", render::message(i + 1, message));
            }
        }
        AppEvent::Chat(ChatUpdate::Reaction { message_id, .. }) => {
            let Some(chat) = app.chat() else { return };
            if let Some((i, message)) = chat.messages().iter().enumerate().find(|(_, m)| m.id == *message_id) {
                println!("#{} reactions: {}", i + 1, render::reactions(message));
            }
        }
    }
}

fn print_notices(app: &mut App) {
    for notice in app.drain_notices() {
        println!("* {}", notice);
    }
}
