use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand, ValueEnum};
use cmd::{check, crawl, diff, menus, repair, roles, routes};
use enum_as_inner::EnumAsInner;
use logger::Logger;
use permaudit_api::{entity::permissions::PermissionType, report::ReportFormat};
use tracing::error;

mod cmd;
mod logger;

#[allow(clippy::struct_excessive_bools)]
#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        default_value = "conf.yml"
    )]
    config: PathBuf,

    /// Show verbose/debug log
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not print any log
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use JSON to format log
    #[arg(long, global = true)]
    log_json: bool,

    /// Run database migrations before the command
    #[arg(long, global = true)]
    migrate: bool,
}

#[derive(Args, Clone, Debug, Default)]
struct OutputArgs {
    /// Also write the report in this format (console, markdown, json)
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<ReportFormat>,

    /// Exit with code 2 when findings are present
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Clone, Debug, Default)]
struct FilterArgs {
    /// Include permissions with status 0
    #[arg(long)]
    include_disabled: bool,

    /// Only compare one permission type
    #[arg(long, value_name = "TYPE", value_parser = parse_kind)]
    kind: Option<PermissionType>,
}

fn parse_kind(s: &str) -> Result<PermissionType, String> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
        .map_err(|_| format!("unknown permission type `{s}`"))
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Source {
    /// Permission rows in the database
    #[default]
    Db,
    /// Live backend API
    Api,
}

#[derive(Subcommand, EnumAsInner, Clone, Debug)]
enum Commands {
    /// Check config file
    Check,
    /// List roles with permission counts
    Roles,
    /// Compare the permissions of a target role against a reference role
    Diff {
        /// Reference role code or id, default `roles.reference`
        reference: Option<String>,

        /// Target role code or id, default `roles.target`
        target: Option<String>,

        /// Print the SQL granting the missing permissions
        #[arg(long)]
        sql: bool,

        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Plan or apply grants bringing a target role in line with a reference role
    Repair {
        /// Reference role code or id, default `roles.reference`
        reference: Option<String>,

        /// Target role code or id, default `roles.target`
        target: Option<String>,

        /// Also revoke what only the target holds
        #[arg(long)]
        sync: bool,

        /// Execute the plan, dry run otherwise
        #[arg(long)]
        apply: bool,

        /// User id recorded as grantor
        #[arg(long, value_name = "ID")]
        grantor: Option<i32>,

        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Find duplicated express routes
    Routes {
        /// Router index file
        #[arg(value_name = "INDEX")]
        index: PathBuf,

        /// Route module directory, default the index directory
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Check sidebar menu consistency
    Menus {
        /// Where menu rows come from
        #[arg(long, value_enum, default_value_t = Source::Db)]
        source: Source,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Visit every sidebar page and detect not-found pages
    Crawl {
        /// Where menu links come from
        #[arg(long, value_enum, default_value_t = Source::Db)]
        source: Source,

        /// Only crawl pages granted to this role
        #[arg(long, value_name = "CODE")]
        role: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // init logger first
    let mut logger = Logger::new();
    if let Err(e) = logger.start(!cli.quiet, cli.log_json, cli.verbose) {
        eprintln!("Logger init failed: {e}");
        return ExitCode::FAILURE;
    }

    let ret = match &cli.command {
        Commands::Check => check::command(&cli),
        Commands::Roles => roles::command(&cli).await,
        Commands::Diff {
            reference,
            target,
            sql,
            filter,
            output,
        } => diff::command(&cli, reference.as_deref(), target.as_deref(), *sql, filter, output).await,
        Commands::Repair {
            reference,
            target,
            sync,
            apply,
            grantor,
            filter,
            output,
        } => {
            let opt = repair::RepairArgs {
                sync: *sync,
                apply: *apply,
                grantor: *grantor,
            };
            repair::command(&cli, reference.as_deref(), target.as_deref(), opt, filter, output)
                .await
        }
        Commands::Routes { index, dir, output } => routes::command(&cli, index, dir.as_deref(), output),
        Commands::Menus { source, output } => menus::command(&cli, *source, output).await,
        Commands::Crawl {
            source,
            role,
            output,
        } => crawl::command(&cli, *source, role.as_deref(), output).await,
    };
    let code = ret.unwrap_or_else(|e| {
        error!("{e:#}");
        1
    });
    logger.flush();
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn diff_args() {
        let cli = Cli::try_parse_from([
            "permaudit",
            "-c",
            "audit.yml",
            "diff",
            "admin",
            "principal",
            "--sql",
            "--kind",
            "menu",
            "-f",
            "md",
            "--strict",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("audit.yml"));
        let Commands::Diff {
            reference,
            target,
            sql,
            filter,
            output,
        } = cli.command
        else {
            panic!("not a diff command");
        };
        assert_eq!(reference.as_deref(), Some("admin"));
        assert_eq!(target.as_deref(), Some("principal"));
        assert!(sql);
        assert_eq!(filter.kind, Some(PermissionType::Menu));
        assert!(!filter.include_disabled);
        assert_eq!(output.format, Some(ReportFormat::Markdown));
        assert!(output.strict);
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["permaudit", "repair"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("conf.yml"));
        let (reference, target, sync, apply, ..) = cli.command.into_repair().unwrap();
        assert!(reference.is_none() && target.is_none());
        assert!(!sync && !apply);

        let cli = Cli::try_parse_from(["permaudit", "crawl", "--source", "api", "-q"]).unwrap();
        assert!(cli.quiet);
        let (source, role, _) = cli.command.into_crawl().unwrap();
        assert_eq!(source, Source::Api);
        assert!(role.is_none());
    }

    #[test]
    fn bad_values_rejected() {
        assert!(Cli::try_parse_from(["permaudit", "diff", "--kind", "widget"]).is_err());
        assert!(Cli::try_parse_from(["permaudit", "menus", "--source", "file"]).is_err());
        assert!(Cli::try_parse_from(["permaudit", "routes"]).is_err());
    }
}
