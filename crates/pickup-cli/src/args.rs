//! CLI argument definitions using clap

use clap::{Parser, Subcommand};

use pickup_core::models::{EntityKind, ScanType, StatusFilter};

/// Operator console for the school pickup system
#[derive(Parser, Debug)]
#[command(name = "pickup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// API base URL (overrides config and PICKUP_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List one page of parents, children, recuperators or agents
    List {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value = "")]
        search: String,

        /// all, active, inactive or deleted
        #[arg(long, default_value = "all", value_parser = parse_status)]
        status: StatusFilter,

        /// Keep this code selectable even when it is not on the page
        #[arg(long)]
        pin: Option<String>,
    },

    /// Show a single record
    Show {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        code: String,
    },

    /// Record a child entering or leaving
    Scan {
        #[arg(value_parser = parse_scan_type)]
        scan_type: ScanType,

        child: String,

        /// Recuperator collecting the child (exits)
        #[arg(long)]
        recuperator: Option<String>,

        /// Scanning agent (defaults to PICKUP_AGENT or the config)
        #[arg(long)]
        agent: Option<String>,
    },

    /// Scan history of a child, most recent first
    History {
        child: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Presence statistics for a page of children
    Stats {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value = "")]
        search: String,

        /// Also print one line per child
        #[arg(long)]
        detail: bool,
    },

    /// Replace the set of children a recuperator may collect
    Assign {
        recuperator: String,
        children: Vec<String>,
    },

    /// Soft-remove a child
    RemoveChild { code: String },

    /// Restore a soft-removed child
    RestoreChild { code: String },

    /// Show the saved configuration, or change it with the flags below
    Config {
        /// API base URL to store
        #[arg(long)]
        set_url: Option<String>,

        /// Default scanning agent to store
        #[arg(long)]
        set_agent: Option<String>,

        /// Rows per directory page to store
        #[arg(long)]
        set_page_size: Option<u32>,
    },

    /// Refresh statistics periodically
    Watch {
        #[arg(long, default_value = "")]
        search: String,

        /// Seconds between refreshes (defaults to the config)
        #[arg(long)]
        interval: Option<u64>,
    },
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::from_name(s).ok_or_else(|| {
        format!("unknown kind '{}' (expected parents, children, recuperators or agents)", s)
    })
}

fn parse_status(s: &str) -> Result<StatusFilter, String> {
    StatusFilter::from_param(s).ok_or_else(|| format!("unknown status '{}'", s))
}

fn parse_scan_type(s: &str) -> Result<ScanType, String> {
    match s.to_lowercase().as_str() {
        "entry" | "in" => Ok(ScanType::Entry),
        "exit" | "out" => Ok(ScanType::Exit),
        _ => Err(format!("unknown scan type '{}' (expected entry or exit)", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_type() {
        assert_eq!(parse_scan_type("Entry"), Ok(ScanType::Entry));
        assert_eq!(parse_scan_type("out"), Ok(ScanType::Exit));
        assert!(parse_scan_type("sideways").is_err());
    }

    #[test]
    fn test_cli_parses_scan() {
        let cli = Cli::try_parse_from([
            "pickup", "scan", "exit", "CHD-001", "--recuperator", "REC-001", "--agent", "AGT-001",
        ])
        .expect("valid args");
        match cli.command {
            Command::Scan { scan_type, child, recuperator, agent } => {
                assert_eq!(scan_type, ScanType::Exit);
                assert_eq!(child, "CHD-001");
                assert_eq!(recuperator.as_deref(), Some("REC-001"));
                assert_eq!(agent.as_deref(), Some("AGT-001"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_config_update() {
        let cli = Cli::try_parse_from(["pickup", "config", "--set-agent", "AGT-003", "--set-page-size", "30"])
            .expect("valid args");
        match cli.command {
            Command::Config { set_url, set_agent, set_page_size } => {
                assert!(set_url.is_none());
                assert_eq!(set_agent.as_deref(), Some("AGT-003"));
                assert_eq!(set_page_size, Some(30));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["pickup", "list", "teachers"]).is_err());
    }
}
