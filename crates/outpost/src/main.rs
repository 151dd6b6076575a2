// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use outpost::cli::{self, AppContext};
use outpost::config::RefreshMode;
use outpost::model::{BuildingKind, SlotId, VillageId};
use outpost::scheduler::{BuildTask, FarmRule, TroopRule};

#[derive(Parser)]
#[command(
    name = "outpost",
    about = "Outpost: paced automation for a browser strategy game",
    version,
    after_help = "Run 'outpost <command> --help' for details on each command."
)]
struct Cli {
    /// Config file (default: <data-dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for cookies, rule files, logs and the activity journal
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit console logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until Ctrl-C: fetch cycles, rule timers, auto-refresh
    Run {
        /// Refresh mode override (short, long, smart, off)
        #[arg(long)]
        refresh: Option<RefreshMode>,
    },
    /// Log in with the configured credentials and save the session
    Login,
    /// Fetch every village once and print an overview
    Fetch,
    /// Edit the construction queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Edit troop-training rules
    Troops {
        #[command(subcommand)]
        action: TroopAction,
    },
    /// Farm lists: inspect, dispatch, and edit rules
    Farms {
        #[command(subcommand)]
        action: FarmAction,
    },
    /// Show incoming movements for a village
    Attacks { village: VillageId },
    /// Generate shell completion scripts
    ///
    /// Examples:
    ///   outpost completions bash > ~/.local/share/bash-completion/completions/outpost
    ///   outpost completions zsh > ~/.zfunc/_outpost
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Queue an upgrade of a slot up to a target level
    Add {
        village: VillageId,
        slot: SlotId,
        target: u32,
        /// Level the slot is at now
        #[arg(long, default_value_t = 0)]
        current: u32,
        #[arg(long, default_value = "")]
        name: String,
        /// Lower runs first
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,
    },
    List {
        village: Option<VillageId>,
    },
    Remove {
        village: VillageId,
        slot: SlotId,
    },
}

#[derive(Subcommand)]
enum TroopAction {
    /// Create or replace the rule for one building
    Set {
        village: VillageId,
        /// barracks, stable or workshop
        building: BuildingKind,
        /// Troop id as used in the training form, e.g. t1
        troop: String,
        #[arg(long, default_value = "")]
        name: String,
        /// Minutes between batches (jittered by 20%)
        #[arg(long, default_value_t = 5)]
        interval: u32,
        /// Save the rule without starting it
        #[arg(long)]
        disabled: bool,
    },
    List,
    Remove {
        village: VillageId,
        building: BuildingKind,
    },
    Enable {
        village: VillageId,
        building: BuildingKind,
    },
    Disable {
        village: VillageId,
        building: BuildingKind,
    },
}

#[derive(Subcommand)]
enum FarmAction {
    /// List the farm lists visible from a village
    Lists { village: VillageId },
    /// Dispatch a farm list now
    Send { village: VillageId, list: u64 },
    /// Create or replace a farm rule (saved disabled unless --enabled)
    Set {
        list: u64,
        village: VillageId,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value_t = 30)]
        interval: u32,
        #[arg(long)]
        enabled: bool,
    },
    List,
    Remove {
        list: u64,
    },
    Enable {
        list: u64,
    },
    Disable {
        list: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "outpost", &mut std::io::stdout());
        return Ok(());
    }

    let ctx = AppContext::load(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let _guard = cli::logging::init(&ctx.config.log_dir(), cli.json_logs, cli.verbose)?;
    tracing::debug!(config = %ctx.config_path.display(), data_dir = %ctx.config.data_dir.display(), "configuration loaded");

    let result = dispatch(cli.command, ctx).await;
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }
    result
}

async fn dispatch(command: Commands, ctx: AppContext) -> Result<()> {
    match command {
        Commands::Run { refresh } => cli::run_cmd::run(ctx, refresh).await,
        Commands::Login => cli::session_cmd::run_login(&ctx).await,
        Commands::Fetch => cli::session_cmd::run_fetch(&ctx).await,
        Commands::Queue { action } => match action {
            QueueAction::Add {
                village,
                slot,
                target,
                current,
                name,
                priority,
            } => cli::queue_cmd::run_add(
                &ctx,
                BuildTask {
                    village_id: village,
                    slot_id: slot,
                    current_level: current,
                    target_level: target,
                    building_name: name,
                    priority,
                },
            ),
            QueueAction::List { village } => cli::queue_cmd::run_list(&ctx, village),
            QueueAction::Remove { village, slot } => cli::queue_cmd::run_remove(&ctx, village, slot),
        },
        Commands::Troops { action } => match action {
            TroopAction::Set {
                village,
                building,
                troop,
                name,
                interval,
                disabled,
            } => cli::troops_cmd::run_set(
                &ctx,
                TroopRule {
                    village_id: village,
                    building,
                    troop_id: troop,
                    troop_name: name,
                    interval_minutes: interval,
                    enabled: !disabled,
                },
            ),
            TroopAction::List => cli::troops_cmd::run_list(&ctx),
            TroopAction::Remove { village, building } => cli::troops_cmd::run_remove(&ctx, village, building),
            TroopAction::Enable { village, building } => cli::troops_cmd::run_toggle(&ctx, village, building, true),
            TroopAction::Disable { village, building } => cli::troops_cmd::run_toggle(&ctx, village, building, false),
        },
        Commands::Farms { action } => match action {
            FarmAction::Lists { village } => cli::farms_cmd::run_lists(&ctx, village).await,
            FarmAction::Send { village, list } => cli::farms_cmd::run_send(&ctx, village, list).await,
            FarmAction::Set {
                list,
                village,
                name,
                interval,
                enabled,
            } => cli::farms_cmd::run_set(
                &ctx,
                FarmRule {
                    list_id: list,
                    village_id: village,
                    list_name: name,
                    interval_minutes: interval,
                    enabled,
                },
            ),
            FarmAction::List => cli::farms_cmd::run_list(&ctx),
            FarmAction::Remove { list } => cli::farms_cmd::run_remove(&ctx, list),
            FarmAction::Enable { list } => cli::farms_cmd::run_toggle(&ctx, list, true),
            FarmAction::Disable { list } => cli::farms_cmd::run_toggle(&ctx, list, false),
        },
        Commands::Attacks { village } => cli::attacks_cmd::run(&ctx, village).await,
        Commands::Completions { .. } => Ok(()),
    }
}
