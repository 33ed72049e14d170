//! Command-line utility for managing a running missive instance
//!
//! Everything goes through the control socket:
//! - Queue administration (pause, resume, retries, cancellation, health)
//! - Campaign lifecycle
//! - Digest runs
//! - Liveness and status

#![allow(clippy::items_after_statements, clippy::single_match_else)]

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use missive_common::{Cadence, CampaignId, QueueItemId, QueueStatus, RecipientId, TemplateKind};
use missive_control::{
    CampaignCommand, ControlClient, DEFAULT_CONTROL_SOCKET, DigestCommand, QueueCommand,
    RequestCommand, ResponseData, ResponsePayload, SystemCommand,
    auth::hash_token,
    protocol::{CampaignVariant, EnqueueSpec, FlagName, unix_seconds},
};

/// Command-line utility for managing missive
#[derive(Parser, Debug)]
#[command(name = "missivectl")]
#[command(about = "Manage a running missive instance", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: String,

    /// Token presented to the control socket when authentication is enabled
    #[arg(long, global = true, env = "MISSIVE_CONTROL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue administration
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Bulk campaigns
    Campaign {
        #[command(subcommand)]
        action: CampaignAction,
    },
    /// Digest runs
    Digest {
        #[command(subcommand)]
        action: DigestAction,
    },
    /// System status and health
    System {
        #[command(subcommand)]
        action: SystemAction,
    },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// Stop dispatch ticks from sending
    Pause,
    /// Let dispatch ticks send again
    Resume,
    /// Show queue health
    Health {
        /// Watch mode - continuously update
        #[arg(long)]
        watch: bool,

        /// Update interval in seconds (for watch mode)
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// List queue items
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<QueueStatus>,

        /// Filter by recipient id
        #[arg(long)]
        recipient: Option<RecipientId>,

        /// Filter by campaign id
        #[arg(long)]
        campaign: Option<CampaignId>,

        /// Maximum number of items
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List dead-lettered items, most recent first
    DeadLetters {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Requeue every failed and dead-lettered item
    RetryAll,
    /// Requeue specific items
    Retry {
        #[arg(required = true)]
        ids: Vec<QueueItemId>,
    },
    /// Cancel a pending or processing item
    Cancel { id: QueueItemId },
    /// Queue a message
    Enqueue {
        #[arg(long)]
        recipient: RecipientId,

        /// Template kind, e.g. `welcome` or `automated_notice`
        #[arg(long)]
        template: TemplateKind,

        #[arg(long)]
        subject: String,

        /// HTML body
        #[arg(long)]
        body: String,

        /// 1 to 10, higher first
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        priority: Option<u8>,

        /// RFC 3339 time to send at
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
    },
    /// Run a dispatch tick immediately
    ProcessNow,
    /// Run the retention sweep immediately
    Cleanup,
    /// Show the runtime flags
    Flags,
    /// Change a runtime flag
    SetFlag {
        #[arg(value_enum)]
        flag: FlagArg,

        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FlagArg {
    Paused,
    SendingEnabled,
    DemoMode,
    PauseAll,
}

impl From<FlagArg> for FlagName {
    fn from(flag: FlagArg) -> Self {
        match flag {
            FlagArg::Paused => Self::Paused,
            FlagArg::SendingEnabled => Self::SendingEnabled,
            FlagArg::DemoMode => Self::DemoMode,
            FlagArg::PauseAll => Self::PauseAll,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CampaignAction {
    /// Create a draft campaign
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        subject: String,

        /// HTML body; `{{name}}` is replaced per recipient
        #[arg(long)]
        body: String,

        /// Subject for odd-numbered recipients
        #[arg(long, requires = "body_b")]
        subject_b: Option<String>,

        #[arg(long, requires = "subject_b")]
        body_b: Option<String>,

        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        priority: Option<u8>,
    },
    /// Start sending, optionally resuming from the saved offset
    Start {
        id: CampaignId,

        #[arg(long)]
        resume: bool,
    },
    /// Start sending at a later time
    Schedule {
        id: CampaignId,

        /// RFC 3339 time
        #[arg(value_parser = parse_time)]
        at: DateTime<Utc>,
    },
    /// Stop after the current batch
    Stop { id: CampaignId },
    /// Stop and cancel every pending item
    Cancel { id: CampaignId },
    /// List campaigns
    List,
}

#[derive(Subcommand, Debug)]
enum DigestAction {
    /// Queue digests for every subscriber at a cadence
    Start { cadence: Cadence },
}

#[derive(Subcommand, Debug)]
enum SystemAction {
    /// Check if missive is responding
    Ping,
    /// Get system status
    Status,
    /// Print the SHA-256 hash of a token for the `control.auth` config
    HashToken { token: String },
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::System {
            action: SystemAction::HashToken { token },
        } => {
            println!("{}", hash_token(&token));
            return Ok(());
        }
        Commands::Queue {
            action: QueueAction::Health { watch: true, interval },
        } => {
            let client = check_control_socket(&cli.control_socket, cli.token)?;
            loop {
                print!("\x1B[2J\x1B[1;1H");
                run(&client, RequestCommand::Queue(QueueCommand::Health), cli.format).await?;
                println!("\nPress Ctrl+C to exit");
                tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
            }
        }
        Commands::Queue { action } => RequestCommand::Queue(queue_command(action)),
        Commands::Campaign { action } => RequestCommand::Campaign(campaign_command(action)),
        Commands::Digest {
            action: DigestAction::Start { cadence },
        } => RequestCommand::Digest(DigestCommand::Start { cadence }),
        Commands::System { action } => RequestCommand::System(match action {
            SystemAction::Ping => SystemCommand::Ping,
            SystemAction::Status | SystemAction::HashToken { .. } => SystemCommand::Status,
        }),
    };

    let client = check_control_socket(&cli.control_socket, cli.token)?;
    run(&client, command, cli.format).await
}

fn queue_command(action: QueueAction) -> QueueCommand {
    match action {
        QueueAction::Pause => QueueCommand::Pause,
        QueueAction::Resume => QueueCommand::Resume,
        QueueAction::Health { .. } => QueueCommand::Health,
        QueueAction::List {
            status,
            recipient,
            campaign,
            limit,
        } => QueueCommand::List {
            status,
            recipient,
            campaign,
            limit,
        },
        QueueAction::DeadLetters { limit } => QueueCommand::DeadLetters { limit },
        QueueAction::RetryAll => QueueCommand::RetryAllFailed,
        QueueAction::Retry { ids } => QueueCommand::RetrySelected { ids },
        QueueAction::Cancel { id } => QueueCommand::Cancel { id },
        QueueAction::Enqueue {
            recipient,
            template,
            subject,
            body,
            priority,
            at,
        } => QueueCommand::Enqueue(EnqueueSpec {
            recipient_id: recipient,
            template_kind: template,
            subject,
            body,
            priority,
            scheduled_at: at.map(unix_seconds),
        }),
        QueueAction::ProcessNow => QueueCommand::ProcessNow,
        QueueAction::Cleanup => QueueCommand::Cleanup,
        QueueAction::Flags => QueueCommand::Flags,
        QueueAction::SetFlag { flag, value } => QueueCommand::SetFlag {
            flag: flag.into(),
            value,
        },
    }
}

fn campaign_command(action: CampaignAction) -> CampaignCommand {
    match action {
        CampaignAction::Create {
            name,
            subject,
            body,
            subject_b,
            body_b,
            priority,
        } => CampaignCommand::Create {
            name,
            variant_a: CampaignVariant { subject, body },
            variant_b: subject_b
                .zip(body_b)
                .map(|(subject, body)| CampaignVariant { subject, body }),
            priority,
        },
        CampaignAction::Start { id, resume } => CampaignCommand::Start { id, resume },
        CampaignAction::Schedule { id, at } => CampaignCommand::Schedule {
            id,
            at: unix_seconds(at),
        },
        CampaignAction::Stop { id } => CampaignCommand::Stop { id },
        CampaignAction::Cancel { id } => CampaignCommand::Cancel { id },
        CampaignAction::List => CampaignCommand::List,
    }
}

fn check_control_socket(socket_path: &str, token: Option<String>) -> anyhow::Result<ControlClient> {
    let mut client = ControlClient::new(socket_path);
    if let Some(token) = token {
        client = client.with_token(token);
    }

    if let Err(e) = client.check_socket_exists() {
        anyhow::bail!(
            "Cannot connect to the missive control socket at {socket_path}.\n\
             Error: {e}\n\
             \n\
             Is missive running?\n\
             You can configure the socket path with --control-socket or in missive.config.ron"
        );
    }

    Ok(client)
}

async fn run(client: &ControlClient, command: RequestCommand, format: Format) -> anyhow::Result<()> {
    let response = client.send(command).await?;

    match response.payload {
        ResponsePayload::Ok => match format {
            Format::Json => println!(r#"{{"status": "ok"}}"#),
            Format::Text => println!("✓ Command completed successfully"),
        },
        ResponsePayload::Error(e) => anyhow::bail!("Server error: {e}"),
        ResponsePayload::Data(data) => match format {
            Format::Json => println!("{}", serde_json::to_string_pretty(&data)?),
            Format::Text => print_text(*data),
        },
    }

    Ok(())
}

fn print_text(data: ResponseData) {
    match data {
        ResponseData::QueueHealth(health) => {
            println!("=== Queue Health ===\n");
            println!("{health}");
        }
        ResponseData::QueueList(items) => {
            if items.is_empty() {
                println!("No matching items");
                return;
            }
            for item in &items {
                println!("{item}\n");
            }
            println!("Total: {} item(s)", items.len());
        }
        ResponseData::DeadLetters(records) => {
            if records.is_empty() {
                println!("No dead letters");
                return;
            }
            for record in &records {
                println!("{record}\n");
            }
            println!("Total: {} dead letter(s)", records.len());
        }
        ResponseData::Affected(count) => println!("✓ {count} item(s) affected"),
        ResponseData::Enqueued(id) => println!("✓ Queued {id}"),
        ResponseData::Tick(tick) => println!("{tick}"),
        ResponseData::Cleanup(cleanup) => println!("{cleanup}"),
        ResponseData::Flags(flags) => println!("{flags}"),
        ResponseData::CampaignCreated(id) => println!("✓ Created campaign {id}"),
        ResponseData::Campaigns(campaigns) => {
            if campaigns.is_empty() {
                println!("No campaigns");
                return;
            }
            for campaign in &campaigns {
                println!("{campaign}");
            }
        }
        ResponseData::DigestStarted { run_id } => println!("✓ Digest run {run_id} started"),
        ResponseData::SystemStatus(status) => {
            println!("=== missive Status ===\n");
            println!("{status}");
        }
        ResponseData::Message(message) => println!("{message}"),
    }
}
