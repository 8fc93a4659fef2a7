use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use opsgate_audit::{AuditFilter, AuditStatus, AuditTrail, DEFAULT_FETCH_LIMIT};
use opsgate_auth::Authenticator;
use opsgate_gateway::{OperationBroker, PrivilegedOperation};
use opsgate_policy::PolicyStore;

#[derive(Clone, Debug, Parser)]
#[command(name = "opsgate-cli")]
#[command(about = "Role-gated privileged operation gateway")]
struct Cli {
    #[arg(long, default_value = "data/policy.json", global = true)]
    policy: PathBuf,
    #[arg(long, default_value = "data/users.json", global = true)]
    users: PathBuf,
    #[arg(long = "audit-log", default_value = "logs/actions.log", global = true)]
    audit_log: PathBuf,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Clone, Debug, Args)]
struct LoginArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
}

#[derive(Clone, Debug, Subcommand)]
enum CliCommand {
    /// Read a file and print its contents.
    ReadFile {
        #[command(flatten)]
        login: LoginArgs,
        path: String,
    },
    /// Create or overwrite a file with the given text.
    WriteFile {
        #[command(flatten)]
        login: LoginArgs,
        path: String,
        text: String,
    },
    /// List every process visible on the host.
    ListProcesses {
        #[command(flatten)]
        login: LoginArgs,
    },
    /// Start a detached process from a whitespace-split command line.
    SpawnProcess {
        #[command(flatten)]
        login: LoginArgs,
        command: String,
    },
    /// Send one ping probe and print its raw output.
    PingHost {
        #[command(flatten)]
        login: LoginArgs,
        host: String,
    },
    /// Print a host introspection summary.
    SystemInfo {
        #[command(flatten)]
        login: LoginArgs,
    },
    /// Browse or export the audit trail.
    Logs {
        #[arg(long, default_value_t = DEFAULT_FETCH_LIMIT)]
        limit: usize,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
    Success,
    Failed,
}

impl From<StatusArg> for AuditStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Success => AuditStatus::Success,
            StatusArg::Failed => AuditStatus::Failed,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let trail = AuditTrail::open(&cli.audit_log)
        .with_context(|| format!("failed to open audit log {}", cli.audit_log.display()))?;

    match cli.command {
        CliCommand::Logs {
            limit,
            username,
            action,
            status,
            export,
        } => {
            let filter = AuditFilter {
                username,
                action,
                status: status.map(Into::into),
            };
            if let Some(csv_path) = export {
                let exported = trail.export_csv(&csv_path, limit, &filter)?;
                println!("exported {exported} rows to {}", csv_path.display());
            } else {
                for record in trail.fetch(limit, &filter)? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        record.username, record.action, record.status, record.timestamp
                    );
                }
            }
            Ok(())
        }
        command => {
            let policy = PolicyStore::load(&cli.policy)
                .with_context(|| format!("failed to load policy {}", cli.policy.display()))?;
            let auth = Authenticator::load(&cli.users, policy)
                .with_context(|| format!("failed to load users {}", cli.users.display()))?;
            let broker = OperationBroker::new(&trail);

            let (login, operation) = into_operation(command);
            let session = match auth.authenticate(&login.username, &login.password) {
                Ok(session) => {
                    broker.record_login(&login.username, true);
                    session
                }
                Err(failure) => {
                    broker.record_login(&login.username, false);
                    anyhow::bail!("{failure}");
                }
            };

            let outcome = broker.dispatch(&session, &operation);
            if outcome.ok {
                println!("{}", outcome.detail);
                Ok(())
            } else {
                anyhow::bail!("{}", outcome.detail);
            }
        }
    }
}

fn into_operation(command: CliCommand) -> (LoginArgs, PrivilegedOperation) {
    match command {
        CliCommand::ReadFile { login, path } => (login, PrivilegedOperation::ReadFile { path }),
        CliCommand::WriteFile { login, path, text } => {
            (login, PrivilegedOperation::WriteFile { path, text })
        }
        CliCommand::ListProcesses { login } => (login, PrivilegedOperation::ListProcesses),
        CliCommand::SpawnProcess { login, command } => {
            (login, PrivilegedOperation::SpawnProcess { command })
        }
        CliCommand::PingHost { login, host } => (login, PrivilegedOperation::PingHost { host }),
        CliCommand::SystemInfo { login } => (login, PrivilegedOperation::SystemInfo),
        CliCommand::Logs { .. } => unreachable!("logs is handled before dispatch"),
    }
}
