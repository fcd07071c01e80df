use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Left 4 Dead 2 addon manager", long_about = None)]
pub struct Cli {
    /// Addons directory, overriding the configured one for this run
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results and events as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current settings
    Show,
    /// Validate and store the addons directory
    SetRoot { path: PathBuf },
    /// Merge a partial JSON document into the settings
    Set { patch: String },
    /// Restore default settings
    Reset,
}

#[derive(Subcommand)]
pub enum WorkshopCommands {
    /// Resolve a workshop URL or id to its download record
    Info { input: String },
    /// Browse the workshop catalogue
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(short, long, default_value = "")]
        query: String,
        /// trend, recent or top
        #[arg(long, default_value = "trend")]
        sort: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Full catalogue entry for one item
    Detail { id: String },
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Scan and list installed addons
    Scan {
        #[arg(short, long, default_value = "")]
        query: String,
        /// Primary tag (map, character, weapon, other)
        #[arg(long)]
        tag: Option<String>,
        /// Required secondary tag, repeatable
        #[arg(long = "sub")]
        secondary: Vec<String>,
    },
    /// List known tags
    Tags { primary: Option<String> },
    /// Report files overridden by more than one addon
    Conflicts,
    /// Download workshop items or direct URLs into the addons directory
    Download {
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Workshop lookups
    Workshop {
        #[command(subcommand)]
        command: WorkshopCommands,
    },
    /// Enable or disable an addon (path relative to the addons directory)
    Toggle { path: PathBuf },
    /// Move a workshop addon into the addons directory
    Promote { path: PathBuf },
    /// Hide or show an addon through the leading `_` of its file name
    ToggleVisibility { path: PathBuf },
    /// Write tags into an addon's file name; no tags restores detection
    SetTags {
        path: PathBuf,
        #[arg(long)]
        primary: Option<String>,
        /// Secondary tag, repeatable
        #[arg(long = "sub")]
        secondary: Vec<String>,
    },
    /// Rename an addon, keeping tags written in its old name
    Rename { path: PathBuf, new_name: String },
    /// Delete addon files
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Pack addons into a new zip file
    Export {
        /// Zip file to create
        #[arg(short, long)]
        output: PathBuf,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["vpk-manager", "scan", "--tag", "map", "--json", "-v"]).unwrap();
        assert!(cli.json && cli.verbose);
        match cli.command {
            Commands::Scan { tag, .. } => assert_eq!(tag.as_deref(), Some("map")),
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn download_needs_an_input() {
        assert!(Cli::try_parse_from(["vpk-manager", "download"]).is_err());
    }

    #[test]
    fn set_tags_and_export_arguments() {
        let cli = Cli::try_parse_from([
            "vpk-manager",
            "set-tags",
            "skin.vpk",
            "--primary",
            "character",
            "--sub",
            "Zoey",
            "--sub",
            "Nick",
        ])
        .unwrap();
        match cli.command {
            Commands::SetTags {
                primary, secondary, ..
            } => {
                assert_eq!(primary.as_deref(), Some("character"));
                assert_eq!(secondary, vec!["Zoey", "Nick"]);
            }
            _ => panic!("expected set-tags"),
        }

        assert!(Cli::try_parse_from(["vpk-manager", "export", "a.vpk"]).is_err());
        let cli = Cli::try_parse_from(["vpk-manager", "export", "-o", "out.zip", "a.vpk", "b.vpk"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Export { ref paths, .. } if paths.len() == 2));
    }
}
