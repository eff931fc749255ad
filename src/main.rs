use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ispadmin::api::types::{
  CreateApiKey, CreateTicket, CreateTicketMessage, CreateWebhook, PartnerStatus, TicketPriority,
  TicketStatus, TicketTarget, UpdatePartner, UpdateTicket,
};
use ispadmin::api::HttpTransport;
use ispadmin::cache::Filters;
use ispadmin::config::Config;
use ispadmin::resources::{
  AdminClient, InvoiceFilters, PartnerFilters, TemplateFilters, TicketFilters,
};

#[derive(Parser, Debug)]
#[command(name = "ispadmin")]
#[command(about = "Command-line client for the ISP administration API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ispadmin/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Support tickets
  #[command(subcommand)]
  Tickets(TicketCommand),
  /// Reseller partners
  #[command(subcommand)]
  Partners(PartnerCommand),
  /// API keys of the current account
  #[command(subcommand)]
  ApiKeys(ApiKeyCommand),
  /// Webhook subscriptions
  #[command(subcommand)]
  Webhooks(WebhookCommand),
  /// Communication templates
  #[command(subcommand)]
  Templates(TemplateCommand),
  /// Invoices
  #[command(subcommand)]
  Invoices(InvoiceCommand),
  /// Platform health report
  Health,
  /// Error-rate and latency metrics
  Metrics {
    /// Aggregation window, e.g. 1h or 24h
    #[arg(long)]
    period: Option<String>,
  },
}

#[derive(ClapArgs, Debug)]
struct PageArgs {
  #[arg(long)]
  page: Option<u32>,
  #[arg(long)]
  limit: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum TicketCommand {
  List {
    #[arg(long)]
    status: Option<TicketStatus>,
    #[arg(long)]
    priority: Option<TicketPriority>,
    #[arg(long)]
    search: Option<String>,
    #[command(flatten)]
    paging: PageArgs,
  },
  Show {
    id: String,
    /// Include the conversation
    #[arg(long)]
    messages: bool,
  },
  Create {
    subject: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    target: Option<TicketTarget>,
    #[arg(long)]
    priority: Option<TicketPriority>,
    #[arg(long)]
    category: Option<String>,
  },
  Update {
    id: String,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    status: Option<TicketStatus>,
    #[arg(long)]
    priority: Option<TicketPriority>,
    #[arg(long)]
    assign: Option<String>,
  },
  Close {
    id: String,
  },
  Delete {
    id: String,
  },
  Reply {
    id: String,
    message: String,
    /// Visible to staff only
    #[arg(long)]
    internal: bool,
    /// Move the ticket to this status with the reply
    #[arg(long)]
    status: Option<TicketStatus>,
  },
}

#[derive(Subcommand, Debug)]
enum PartnerCommand {
  List {
    #[arg(long)]
    status: Option<PartnerStatus>,
    #[arg(long)]
    tier: Option<String>,
    #[arg(long)]
    search: Option<String>,
    #[command(flatten)]
    paging: PageArgs,
  },
  Show {
    id: String,
  },
  Update {
    id: String,
    #[arg(long)]
    status: Option<PartnerStatus>,
    #[arg(long)]
    tier: Option<String>,
    #[arg(long)]
    email: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum ApiKeyCommand {
  List,
  Create {
    name: String,
    #[arg(long, value_delimiter = ',')]
    scopes: Vec<String>,
    #[arg(long)]
    description: Option<String>,
  },
  Rename {
    id: String,
    name: String,
  },
  Revoke {
    id: String,
  },
}

#[derive(Subcommand, Debug)]
enum WebhookCommand {
  List {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    limit: u32,
  },
  Create {
    url: String,
    #[arg(long, value_delimiter = ',', required = true)]
    events: Vec<String>,
    #[arg(long)]
    description: Option<String>,
  },
  Delete {
    id: String,
  },
  /// Send a test event
  Test {
    id: String,
  },
}

#[derive(Subcommand, Debug)]
enum TemplateCommand {
  List {
    #[arg(long)]
    search: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum InvoiceCommand {
  List {
    #[arg(long)]
    status: Option<ispadmin::api::types::InvoiceStatus>,
    #[arg(long)]
    tenant: Option<String>,
    #[command(flatten)]
    paging: PageArgs,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let client = AdminClient::from_config(&config)?;

  run(&client, args.command).await
}

/// Log to stderr, or to `log_file` through a background writer. The returned
/// guard flushes the file writer on drop.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ispadmin=info"));

  match log_file {
    Some(path) => {
      let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
      Ok(None)
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn run(client: &AdminClient<HttpTransport>, command: Command) -> Result<()> {
  match command {
    Command::Tickets(cmd) => tickets(client, cmd).await,
    Command::Partners(cmd) => partners(client, cmd).await,
    Command::ApiKeys(cmd) => api_keys(client, cmd).await,
    Command::Webhooks(cmd) => webhooks(client, cmd).await,
    Command::Templates(TemplateCommand::List { search }) => {
      let filters = TemplateFilters {
        search,
        ..Default::default()
      };
      print_json(&client.templates().fetch_list(&filters.into()).await?.data)
    }
    Command::Invoices(InvoiceCommand::List {
      status,
      tenant,
      paging,
    }) => {
      let filters = InvoiceFilters {
        status,
        tenant_id: tenant,
        page: paging.page,
        limit: paging.limit,
      };
      print_json(&client.invoices().fetch_list(&filters.into()).await?.data)
    }
    Command::Health => {
      let report = client.monitoring().fetch_health().await?.data;
      print_json(&report)?;
      if !report.is_healthy() {
        return Err(eyre!("Unhealthy checks: {}", report.failing_checks().join(", ")));
      }
      Ok(())
    }
    Command::Metrics { period } => {
      print_json(&client.monitoring().fetch_metrics(period.as_deref()).await?.data)
    }
  }
}

async fn tickets(client: &AdminClient<HttpTransport>, cmd: TicketCommand) -> Result<()> {
  let tickets = client.tickets();
  match cmd {
    TicketCommand::List {
      status,
      priority,
      search,
      paging,
    } => {
      let filters = TicketFilters {
        status,
        priority,
        search,
        page: paging.page,
        page_size: paging.limit,
      };
      print_json(&tickets.fetch_list(&filters.into()).await?.data)
    }
    TicketCommand::Show { id, messages } => {
      print_json(&tickets.fetch_detail(&id).await?.data)?;
      if messages {
        print_json(&tickets.fetch_messages(&id).await?.data)?;
      }
      Ok(())
    }
    TicketCommand::Create {
      subject,
      description,
      target,
      priority,
      category,
    } => {
      let input = CreateTicket {
        subject,
        description,
        target_type: target,
        priority,
        category,
        ..Default::default()
      };
      print_json(&tickets.create(input).await?)
    }
    TicketCommand::Update {
      id,
      subject,
      status,
      priority,
      assign,
    } => {
      let patch = UpdateTicket {
        subject,
        status,
        priority,
        assigned_to_user_id: assign,
        ..Default::default()
      };
      print_json(&tickets.update(&id, patch).await?)
    }
    TicketCommand::Close { id } => print_json(&tickets.close(&id).await?),
    TicketCommand::Delete { id } => Ok(tickets.delete(&id).await?),
    TicketCommand::Reply {
      id,
      message,
      internal,
      status,
    } => {
      let input = CreateTicketMessage {
        message,
        is_internal: internal,
        new_status: status,
      };
      print_json(&tickets.add_message(&id, input).await?)
    }
  }
}

async fn partners(client: &AdminClient<HttpTransport>, cmd: PartnerCommand) -> Result<()> {
  let partners = client.partners();
  match cmd {
    PartnerCommand::List {
      status,
      tier,
      search,
      paging,
    } => {
      let filters = PartnerFilters {
        status,
        tier,
        search,
        page: paging.page,
        limit: paging.limit,
      };
      print_json(&partners.fetch_list(&filters.into()).await?.data)
    }
    PartnerCommand::Show { id } => print_json(&partners.fetch_detail(&id).await?.data),
    PartnerCommand::Update {
      id,
      status,
      tier,
      email,
    } => {
      let patch = UpdatePartner {
        status,
        tier,
        primary_email: email,
        ..Default::default()
      };
      print_json(&partners.update(&id, patch).await?)
    }
  }
}

async fn api_keys(client: &AdminClient<HttpTransport>, cmd: ApiKeyCommand) -> Result<()> {
  let keys = client.api_keys();
  match cmd {
    ApiKeyCommand::List => print_json(&keys.fetch_list(&Filters::new()).await?.data),
    ApiKeyCommand::Create {
      name,
      scopes,
      description,
    } => {
      let input = CreateApiKey {
        name,
        scopes,
        description,
        ..Default::default()
      };
      print_json(&keys.create(input).await?)
    }
    ApiKeyCommand::Rename { id, name } => print_json(&keys.rename(&id, &name).await?),
    ApiKeyCommand::Revoke { id } => Ok(keys.revoke(&id).await?),
  }
}

async fn webhooks(client: &AdminClient<HttpTransport>, cmd: WebhookCommand) -> Result<()> {
  let webhooks = client.webhooks();
  match cmd {
    WebhookCommand::List { page, limit } => {
      print_json(&webhooks.fetch_webhooks(page, limit).await?.data)
    }
    WebhookCommand::Create {
      url,
      events,
      description,
    } => {
      let input = CreateWebhook {
        url,
        events,
        description,
        secret: None,
      };
      print_json(&webhooks.create(input).await?)
    }
    WebhookCommand::Delete { id } => Ok(webhooks.delete(&id).await?),
    WebhookCommand::Test { id } => print_json(&webhooks.test_delivery(&id).await?),
  }
}
