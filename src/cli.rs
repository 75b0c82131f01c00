// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// hive — autonomous multi-agent runtime.
#[derive(Parser, Debug)]
#[command(name = "hive", version, about)]
pub struct Cli {
    /// Path to an explicit config file (highest-priority layer).
    #[arg(long, short = 'c', env = "HIVE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (overrides HIVE_LOG).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the runtime: HTTP/WS server, scheduler, agent pool, metrics.
    Serve,

    /// Upsert cron jobs from a YAML definition file.
    ///
    /// Idempotent: running the same file twice yields identical rows.
    MigrateJobs {
        /// Path to the jobs YAML file.
        file: PathBuf,
    },

    /// Export one session transcript to the export directory.
    Export {
        /// Session id.
        session_id: String,
        /// Output format.
        #[arg(long, value_enum, default_value_t = ExportFormat::Jsonl)]
        format: ExportFormat,
    },

    /// Print the merged configuration and exit.
    ShowConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Jsonl,
    Markdown,
}
