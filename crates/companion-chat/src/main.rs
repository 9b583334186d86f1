#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use companion_chat::{config::Config, memory_db::{MemoryDatabase, NewUser}, run_server, telemetry};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "companion-chat", version, about = "Streaming AI companion chat backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Provision a user and print a bearer token for it
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        personality: Option<String>,
        #[arg(long)]
        activity: Option<String>,
        #[arg(long)]
        goals: Option<String>,
    },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::CreateUser { email, name, personality, activity, goals } => {
            let db = MemoryDatabase::new(&cfg.database_path)?;
            let user = db.users.create_user(&NewUser {
                email,
                full_name: Some(name),
                personality_type: personality,
                favorite_activity: activity,
                daily_goals: goals,
            })?;
            let token = db.users.issue_token(&user.id)?;
            println!("Created user {} <{}>", user.id, user.email);
            println!("Bearer token (shown once): {}", token);
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
