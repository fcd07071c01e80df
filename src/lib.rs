use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use serde::Serialize;
use vpk_manager_core::core::classifier::ClassifierRules;
use vpk_manager_core::core::conflict::ConflictChecker;
use vpk_manager_core::core::http_client::build_download_client;
use vpk_manager_core::core::library::Library;
use vpk_manager_core::core::queue::DownloadManager;
use vpk_manager_core::core::root_dir::RootDir;
use vpk_manager_core::core::vpk::VpkReader;
use vpk_manager_core::core::workshop::WorkshopClient;
use vpk_manager_core::fs_paths::{AppPaths, DesktopPaths};
use vpk_manager_core::models::settings::AppSettings;
use vpk_manager_core::models::task::TaskStatus;
use vpk_manager_core::models::workshop::WorkshopQuery;

pub mod cli;
pub mod commands;
pub mod core;
pub mod storage;

use crate::cli::{Cli, Commands, ConfigCommands, WorkshopCommands};
use crate::core::events::ConsoleEventEmitter;

pub struct AppState {
    pub paths: Arc<dyn AppPaths>,
    pub settings: AppSettings,
    pub root: RootDir,
    pub emitter: ConsoleEventEmitter,
}

impl AppState {
    /// Loads stored settings; `root_override` replaces the configured addons
    /// directory for this run and must pass validation.
    pub fn load(
        paths: Arc<dyn AppPaths>,
        root_override: Option<&Path>,
        emitter: ConsoleEventEmitter,
    ) -> anyhow::Result<Self> {
        let settings = storage::config::load_settings(paths.as_ref());
        let root = match root_override {
            Some(dir) => {
                let root = RootDir::default();
                root.set(dir)?;
                root
            }
            None => RootDir::new(settings.root_dir.clone()),
        };
        Ok(Self {
            paths,
            settings,
            root,
            emitter,
        })
    }

    pub fn library(&self) -> Library<VpkReader, ConsoleEventEmitter> {
        Library::new(
            self.root.clone(),
            Arc::new(VpkReader),
            self.emitter,
            ClassifierRules::default(),
        )
    }

    pub fn conflict_checker(&self) -> ConflictChecker<VpkReader, ConsoleEventEmitter> {
        ConflictChecker::new(self.root.clone(), Arc::new(VpkReader), self.emitter)
    }

    pub fn download_manager(&self) -> anyhow::Result<DownloadManager<ConsoleEventEmitter>> {
        let client = build_download_client(&self.settings.download, &self.settings.proxy)?;
        Ok(DownloadManager::new(
            self.root.clone(),
            client,
            self.settings.download.clone(),
            self.emitter,
        ))
    }

    pub fn workshop_client(&self) -> anyhow::Result<WorkshopClient> {
        WorkshopClient::new(&self.settings.workshop, &self.settings.proxy)
    }
}

fn print_result<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", human(value));
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn dispatch(cli: Cli, paths: Arc<dyn AppPaths>) -> anyhow::Result<()> {
    let json = cli.json;

    if let Commands::Config { command } = &cli.command {
        let settings = match command {
            ConfigCommands::Show => commands::settings::get_settings(paths.as_ref()),
            ConfigCommands::SetRoot { path } => {
                commands::settings::set_root_dir(paths.as_ref(), path)?
            }
            ConfigCommands::Set { patch } => {
                commands::settings::update_settings(paths.as_ref(), patch)?
            }
            ConfigCommands::Reset => commands::settings::reset_settings(paths.as_ref())?,
        };
        return print_result(json, &settings, |s| {
            serde_json::to_string_pretty(s).unwrap_or_default()
        });
    }

    let state = AppState::load(paths, cli.root.as_deref(), ConsoleEventEmitter::new(json))?;

    match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::Scan {
            query,
            tag,
            secondary,
        } => {
            let filter = commands::library::AddonFilter {
                query,
                primary: tag,
                secondary,
            };
            let addons = commands::library::scan_addons(&state.library(), &filter).await?;
            print_result(json, &addons, |a| commands::library::render_addons(a))
        }
        Commands::Tags { primary } => {
            let tags = commands::library::list_tags(&state.library(), primary.as_deref()).await?;
            print_result(json, &tags, |t| {
                format!(
                    "primary:   {}\nsecondary: {}",
                    t.primary.join(", "),
                    t.secondary.join(", ")
                )
            })
        }
        Commands::Conflicts => {
            let result = commands::conflicts::check_conflicts(&state.conflict_checker()).await?;
            print_result(json, &result, commands::conflicts::render_conflicts)
        }
        Commands::Toggle { path } => {
            let record = commands::library::toggle_addon(&state.library(), &path).await?;
            print_result(json, &record, |r| {
                format!("{} -> {}", r.name, r.path.display())
            })
        }
        Commands::Promote { path } => {
            let record = commands::library::promote_addon(&state.library(), &path).await?;
            print_result(json, &record, |r| {
                format!("{} -> {}", r.name, r.path.display())
            })
        }
        Commands::ToggleVisibility { path } => {
            let record = commands::library::toggle_visibility(&state.library(), &path).await?;
            print_result(json, &record, |r| r.path.display().to_string())
        }
        Commands::SetTags {
            path,
            primary,
            secondary,
        } => {
            let record = commands::library::set_addon_tags(
                &state.library(),
                &path,
                primary.as_deref(),
                &secondary,
            )
            .await?;
            print_result(json, &record, |r| {
                format!("{} ({}: {})", r.name, r.primary_tag, r.secondary_tags.join(", "))
            })
        }
        Commands::Rename { path, new_name } => {
            let record =
                commands::library::rename_addon(&state.library(), &path, &new_name).await?;
            print_result(json, &record, |r| r.path.display().to_string())
        }
        Commands::Delete { paths } => {
            let outcome = commands::library::delete_addons(&state.library(), &paths).await?;
            print_result(json, &outcome, |o| commands::library::render_outcome("deleted", o))?;
            if !outcome.failed.is_empty() {
                bail!("{} of {} deletions failed", outcome.failed.len(), paths.len());
            }
            Ok(())
        }
        Commands::Export { output, paths } => {
            let summary =
                commands::library::export_addons(&state.library(), &paths, &output).await?;
            print_result(json, &summary, commands::library::render_export)
        }
        Commands::Workshop { command } => {
            let client = state.workshop_client()?;
            match command {
                WorkshopCommands::Info { input } => {
                    let details = client.fetch_file_details(&input).await?;
                    print_result(json, &details, commands::workshop::render_file_details)
                }
                WorkshopCommands::List {
                    page,
                    query,
                    sort,
                    tags,
                } => {
                    let query = WorkshopQuery {
                        page,
                        search_text: query,
                        sort,
                        tags,
                    };
                    let list = client.fetch_list(&query).await?;
                    print_result(json, &list, commands::workshop::render_list)
                }
                WorkshopCommands::Detail { id } => {
                    let item = client.fetch_detail(&id).await?;
                    print_result(json, &item, commands::workshop::render_detail)
                }
            }
        }
        Commands::Download { inputs } => {
            let client = state.workshop_client()?;
            let mut details = Vec::with_capacity(inputs.len());
            for input in &inputs {
                match commands::downloads::resolve_details(input, &client).await {
                    Ok(d) => details.push(d),
                    Err(e) => tracing::error!("[workshop] {}: {}", input, e),
                }
            }
            if details.is_empty() {
                bail!("nothing to download");
            }

            let manager = state.download_manager()?;
            let ids = commands::downloads::start_downloads(&manager, details).await;
            let tasks =
                commands::downloads::wait_for_downloads(&manager, &ids, shutdown_signal()).await;
            print_result(json, &tasks, |t| commands::downloads::render_tasks(t))?;

            let unfinished = tasks
                .iter()
                .filter(|t| t.status != TaskStatus::Completed)
                .count();
            if unfinished > 0 || tasks.len() < inputs.len() {
                bail!(
                    "{} of {} downloads did not complete",
                    inputs.len() - (tasks.len() - unfinished),
                    inputs.len()
                );
            }
            Ok(())
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let paths: Arc<dyn AppPaths> = Arc::new(DesktopPaths);
    match runtime.block_on(dispatch(cli, paths)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
