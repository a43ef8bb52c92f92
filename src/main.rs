//! CLI entry point for `attachgrab`.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use attachgrab::classify::organize::organize_directory;
use attachgrab::classify::SortPolicy;
use attachgrab::config::{self, Config};
use attachgrab::download::{self, RunSummary, SessionOptions};
use attachgrab::store::journal::Journal;
use attachgrab::store::run_state::RunState;
use attachgrab::store::StatePaths;
use attachgrab::transport::eml_dir::EmlDirTransport;
use attachgrab::transport::imap_tls::ImapTransport;
use attachgrab::transport::Transport;

#[derive(Parser)]
#[command(
    name = "attachgrab",
    version,
    about = "Download every email attachment in a mailbox, exactly once",
    long_about = "Searches a mailbox for messages with attachments and saves each attachment \
                  under a destination directory. Identical files are stored once, same-named \
                  different files get a (v.N) suffix, and an interrupted run resumes where it \
                  stopped.",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    fetch: FetchArgs,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Download attachments (the default when no subcommand is given)
    Fetch(FetchArgs),
    /// Show the state of an interrupted run
    Status {
        /// Directory holding the journal and run state
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Sort an existing directory of downloads by file metadata
    Organize {
        /// Directory to re-file
        dir: PathBuf,
        /// extension, size or mimetype
        #[arg(short, long, value_name = "POLICY")]
        sort: SortPolicy,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Args)]
struct FetchArgs {
    /// Account to log in as
    #[arg(short, long, value_name = "USER")]
    user: Option<String>,

    /// Password or app password
    #[arg(long, env = "ATTACHGRAB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Destination directory for attachments
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Sort policy: extension, size, mimetype, date, sender, domain, none
    #[arg(short, long, value_name = "POLICY")]
    sort: Option<SortPolicy>,

    /// IMAP server host name
    #[arg(long)]
    server: Option<String>,

    /// IMAPS port
    #[arg(long)]
    port: Option<u16>,

    /// Mailbox to search
    #[arg(long)]
    mailbox: Option<String>,

    /// Raw IMAP search criteria
    #[arg(long)]
    query: Option<String>,

    /// Read messages from a directory of .eml files instead of a server
    #[arg(long, value_name = "DIR")]
    from_dir: Option<PathBuf>,

    /// Discard any interrupted run and start over
    #[arg(long)]
    fresh: bool,

    /// Resume even if user, destination or policy changed (drops the old journal)
    #[arg(long = "override")]
    override_resume: bool,

    /// Directory holding the journal, run state and log file
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();
    let state_override = match &cli.command {
        Some(Commands::Fetch(args)) => args.state_dir.clone(),
        Some(Commands::Status { state_dir }) => state_dir.clone(),
        None => cli.fetch.state_dir.clone(),
        _ => None,
    };
    if state_override.is_some() {
        config.general.state_dir = state_override;
    }

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Some(Commands::Fetch(args)) => cmd_fetch(args, config),
        None => cmd_fetch(cli.fetch, config),
        Some(Commands::Status { .. }) => cmd_status(&config),
        Some(Commands::Organize { dir, sort }) => cmd_organize(&dir, sort),
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and a log file in the state directory.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::state_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "attachgrab.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Download attachments.
fn cmd_fetch(args: FetchArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(server) = args.server {
        config.imap.server = server;
    }
    if let Some(port) = args.port {
        config.imap.port = port;
    }
    if let Some(mailbox) = args.mailbox {
        config.imap.mailbox = mailbox;
    }
    if let Some(query) = args.query {
        config.imap.search_query = query;
    }

    let paths = StatePaths::new(config::state_dir(&config));
    if args.fresh && paths.has_resume_state() {
        RunState::remove(&paths.run_state)?;
        Journal::open(&paths.journal)?.remove()?;
        println!("  Discarded interrupted run.");
    }

    // Values not given on the command line come from an interrupted run first.
    let recorded = RunState::load(&paths.run_state)?;
    if let Some(run) = &recorded {
        println!(
            "  Resuming run started {} for {} into {}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.username,
            run.destination_root.display()
        );
    }

    let username = match (args.user, &recorded, &args.from_dir) {
        (Some(user), _, _) => user,
        (None, Some(run), _) => run.username.clone(),
        (None, None, Some(_)) => "local".to_string(),
        (None, None, None) => prompt("Email address")?,
    };
    let destination = match (args.output, &recorded) {
        (Some(dir), _) => dir,
        (None, Some(run)) => run.destination_root.clone(),
        (None, None) => PathBuf::from(prompt("Destination directory")?),
    };
    let policy = match (args.sort, &recorded) {
        (Some(policy), _) => policy,
        (None, Some(run)) => run.policy,
        (None, None) => prompt_policy(config.download.default_policy)?,
    };
    if username.is_empty() {
        anyhow::bail!("An account name is required");
    }
    if destination.as_os_str().is_empty() {
        anyhow::bail!("A destination directory is required");
    }

    let mut transport: Box<dyn Transport> = match &args.from_dir {
        Some(dir) => Box::new(EmlDirTransport::new(dir)),
        None => Box::new(ImapTransport::new(&config.imap)),
    };
    let secret = resolve_secret(args.password, args.from_dir.is_some(), || {
        prompt_secret("Password")
    })?;

    let mut options = SessionOptions::from_config(&config);
    options.override_resume = args.override_resume;
    let request = RunState::new(username, destination.clone(), policy);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Downloading [{bar:40.cyan/blue}] {pos}/{len} messages")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let summary = download::run(
        transport.as_mut(),
        request,
        &secret,
        paths,
        options,
        Some(&|current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        }),
    )?;
    pb.finish_and_clear();

    print_summary(&summary, &destination, start.elapsed());
    if summary.resume_pending() {
        println!("  Some messages were not downloaded. Run attachgrab again to resume.");
        println!();
    }
    Ok(())
}

/// Print the state of an interrupted run, if any.
fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let paths = StatePaths::new(config::state_dir(config));
    let Some(run) = RunState::load(&paths.run_state)? else {
        println!("  No interrupted run.");
        return Ok(());
    };
    let done = if paths.journal.exists() {
        Journal::open(&paths.journal)?.len()
    } else {
        0
    };

    println!();
    println!("  Interrupted run:");
    println!("  {:<25} {}", "Account", run.username);
    println!("  {:<25} {}", "Destination", run.destination_root.display());
    println!("  {:<25} {}", "Sort policy", run.policy);
    println!(
        "  {:<25} {}",
        "Started",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  {:<25} {}", "Messages done", done);
    println!("  {:<25} {}", "State directory", paths.dir.display());
    println!();
    Ok(())
}

/// Re-file a directory of downloads.
fn cmd_organize(dir: &Path, policy: SortPolicy) -> anyhow::Result<()> {
    if !dir.exists() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }
    let stats = organize_directory(dir, policy)?;
    println!(
        "  Moved {} file(s) into {} folders, {} left in place",
        stats.moved, policy, stats.skipped
    );
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "attachgrab", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

/// Ask for one line on stdin.
fn prompt(label: &str) -> anyhow::Result<String> {
    print!("  {label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// The password from the command line or environment, else from `ask`.
/// A directory source needs none.
fn resolve_secret(
    password: Option<String>,
    from_dir: bool,
    ask: impl FnOnce() -> anyhow::Result<String>,
) -> anyhow::Result<String> {
    match (password, from_dir) {
        (Some(password), _) => Ok(password),
        (None, true) => Ok(String::new()),
        (None, false) => ask(),
    }
}

/// Ask for a secret without echoing it.
fn prompt_secret(label: &str) -> anyhow::Result<String> {
    print!("  {label}: ");
    std::io::stdout().flush()?;
    Ok(rpassword::read_password()?)
}

/// Numbered policy menu. An empty answer picks `default`.
fn prompt_policy(default: SortPolicy) -> anyhow::Result<SortPolicy> {
    println!();
    println!("  How should attachments be sorted?");
    for (i, policy) in SortPolicy::ALL.iter().enumerate() {
        let marker = if *policy == default { " (default)" } else { "" };
        println!("  {:>2}. {}{}", i + 1, policy.describe(), marker);
    }
    let answer = prompt("Choice")?;
    if answer.is_empty() {
        return Ok(default);
    }
    if let Ok(n) = answer.parse::<usize>() {
        return SortPolicy::ALL
            .get(n.wrapping_sub(1))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No menu entry {n}"));
    }
    answer.parse::<SortPolicy>().map_err(anyhow::Error::msg)
}

/// Print the end-of-run report.
fn print_summary(summary: &RunSummary, destination: &Path, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  Download complete:");
    println!("  {:<25} {}", "Messages found", summary.messages_found);
    println!("  {:<25} {}", "Already done", summary.already_done);
    println!("  {:<25} {}", "Messages processed", summary.messages_processed);
    if summary.messages_failed > 0 {
        println!(
            "  {:<25} {} (retried next run)",
            "Messages failed", summary.messages_failed
        );
    }
    println!("  {:<25} {}", "Files stored", summary.stored);
    println!("  {:<25} {}", "  of which renamed", summary.renamed);
    println!("  {:<25} {}", "Duplicates skipped", summary.duplicates);
    println!("  {:<25} {}", "Empty files skipped", summary.empty);
    println!("  {:<25} {}", "Already on disk", summary.pre_existing);
    if summary.write_failures > 0 {
        println!("  {:<25} {}", "Write failures", summary.write_failures);
    }
    println!(
        "  {:<25} {}",
        "Bytes written",
        format_size(summary.bytes_written, BINARY)
    );
    println!("  {:<25} {}", "Destination", destination.display());
    println!("  {:<25} {:.1}s", "Elapsed", elapsed.as_secs_f64());
    println!();
}
