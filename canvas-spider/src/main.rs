use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use canvas_core::{Course, CourseStatus};
use canvas_spider::config::{
    ByteLimit, Config, DEFAULT_CONFIG_FILE, Settings, UpdateMethod, Verbosity, format_bytes,
    load_config, render_template,
};
use canvas_spider::runtime::{SpiderRuntime, SyncSummary};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "canvas-spider",
    version,
    about = "Mirror Canvas course files into a local directory tree"
)]
struct Cli {
    /// Increase log verbosity beyond the configured level (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a YAML configuration template
    Template(TemplateArgs),
    /// Show enrolled courses
    Courses {
        /// Show id, course code and period for each course
        #[arg(short, long)]
        all: bool,
        #[arg(short, long, value_enum, default_value_t = StatusArg::All)]
        status: StatusArg,
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Show the current user
    User {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Show storage quota on Canvas
    Quota {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Download files with the given YAML configuration
    Download {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        yaml: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct TemplateArgs {
    /// Base directory downloads are placed under
    #[arg(short, long)]
    base: Option<PathBuf>,
    /// Maximum total download size, e.g. 2gb
    #[arg(short, long)]
    limit: Option<ByteLimit>,
    /// Maximum size of a single file, e.g. 500mb
    #[arg(short = 'm', long)]
    file_limit: Option<ByteLimit>,
    /// Filenames that are always downloaded
    #[arg(short = 'w', long, value_delimiter = ',')]
    file_wlist: Vec<String>,
    /// Filenames that are never downloaded
    #[arg(short = 'x', long, value_delimiter = ',')]
    file_blist: Vec<String>,
    /// Extensions that are downloaded even when blacklisted
    #[arg(short = 'e', long, value_delimiter = ',')]
    file_ext_wlist: Vec<String>,
    /// Extensions that are not downloaded
    #[arg(short = 'z', long, value_delimiter = ',')]
    file_ext_blist: Vec<String>,
    #[arg(short, long, value_enum)]
    update_method: Option<UpdateMethod>,
    #[arg(long, value_enum)]
    verbosity: Option<Verbosity>,
}

impl TemplateArgs {
    fn into_settings(self) -> Settings {
        let mut settings = Settings::default();
        if let Some(base) = self.base {
            settings.base_dir = base;
        }
        if let Some(limit) = self.limit {
            settings.max_total_size = limit;
        }
        if let Some(limit) = self.file_limit {
            settings.max_file_size = limit;
        }
        if let Some(update) = self.update_method {
            settings.update = update;
        }
        if let Some(verbosity) = self.verbosity {
            settings.verbosity = verbosity;
        }
        settings.files.file_white_list = self.file_wlist;
        settings.files.file_black_list = self.file_blist;
        settings.files.file_extension_white_list = self.file_ext_wlist;
        settings.files.file_extension_black_list = self.file_ext_blist;
        settings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusArg {
    All,
    Completed,
    Ongoing,
}

impl From<StatusArg> for CourseStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::All => CourseStatus::All,
            StatusArg::Completed => CourseStatus::Completed,
            StatusArg::Ongoing => CourseStatus::Ongoing,
        }
    }
}

fn init_tracing(verbosity: Verbosity, extra: u8) {
    const LEVELS: [&str; 4] = ["warn", "info", "debug", "trace"];
    let base = match verbosity {
        Verbosity::Mute => 0,
        Verbosity::Verbose => 1,
        Verbosity::Vverbose => 2,
    };
    let level = LEVELS[(base + usize::from(extra)).min(LEVELS.len() - 1)];
    let default_filter = format!("canvas_spider={level},canvas_core={level}");

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Loads `path` when it exists, otherwise relies on the environment for
/// credentials and defaults for everything else.
fn load_or_env(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        load_config(path).with_context(|| format!("failed to load {}", path.display()))?
    } else {
        Config::from_yaml("").context("no configuration file and no credentials in environment")?
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Template(args) => {
            init_tracing(Verbosity::Mute, cli.verbose);
            print!("{}", render_template(args.into_settings())?);
            Ok(())
        }
        Command::Courses {
            all,
            status,
            config,
        } => {
            let config = load_or_env(&config)?;
            init_tracing(config.settings.verbosity, cli.verbose);
            let runtime = SpiderRuntime::bootstrap(config)?;
            let courses = runtime.courses(status.into()).await?;
            print_courses(&courses, all);
            Ok(())
        }
        Command::User { config } => {
            let config = load_or_env(&config)?;
            init_tracing(config.settings.verbosity, cli.verbose);
            let profile = SpiderRuntime::bootstrap(config)?.profile().await?;
            println!("name:     {}", profile.name);
            println!("id:       {}", profile.id);
            if let Some(email) = profile.primary_email {
                println!("email:    {email}");
            }
            if let Some(login) = profile.login_id {
                println!("login:    {login}");
            }
            Ok(())
        }
        Command::Quota { config } => {
            let config = load_or_env(&config)?;
            init_tracing(config.settings.verbosity, cli.verbose);
            let quota = SpiderRuntime::bootstrap(config)?.quota().await?;
            println!(
                "used {} of {} ({} free)",
                format_bytes(quota.quota_used),
                format_bytes(quota.quota),
                format_bytes(quota.quota.saturating_sub(quota.quota_used))
            );
            Ok(())
        }
        Command::Download { yaml } => {
            let config =
                load_config(&yaml).with_context(|| format!("failed to load {}", yaml.display()))?;
            init_tracing(config.settings.verbosity, cli.verbose);
            let summary = SpiderRuntime::bootstrap(config)?.download().await?;
            print_summary(&summary);
            if !summary.is_success() {
                anyhow::bail!("download finished with failures");
            }
            Ok(())
        }
    }
}

fn print_courses(courses: &[Course], details: bool) {
    println!("Course List:");
    for course in courses {
        println!("  * {}", course.name);
        if details {
            println!("     | course id:     {}", course.id);
            if let Some(code) = &course.course_code {
                println!("     | course code:   {code}");
            }
            println!(
                "     | course period: {} - {}",
                date_part(course.start_at.as_deref()),
                date_part(course.end_at.as_deref())
            );
            if let Some(ratio) = course.progress_ratio() {
                println!("     | progress:      {:.0}%", ratio * 100.0);
            }
        }
    }
}

fn date_part(timestamp: Option<&str>) -> &str {
    timestamp
        .and_then(|value| value.split('T').next())
        .unwrap_or("?")
}

fn print_summary(summary: &SyncSummary) {
    println!(
        "downloaded {} files ({}) across {} courses",
        summary.files_fetched(),
        format_bytes(summary.bytes_fetched()),
        summary.courses.len()
    );
    for course in &summary.courses {
        if course.dropped_folders > 0 {
            println!(
                "  {}: {} folders ({} files) could not be placed",
                course.course_name, course.dropped_folders, course.dropped_files
            );
        }
        if course.renamed > 0 {
            println!(
                "  {}: {} names clashed after sanitizing and were suffixed with their id",
                course.course_name, course.renamed
            );
        }
        for dir in &course.fetch.failed_dirs {
            println!("  failed to create {}: {}", dir.name, dir.error);
        }
    }
    for course in &summary.failed_courses {
        println!(
            "  course {} ({}) skipped: {}",
            course.course_name, course.course_id, course.error
        );
    }
    let failed: Vec<_> = summary.failed_files().collect();
    if !failed.is_empty() {
        println!("failed files:");
        for failure in failed {
            println!("  - {} [{:?}]: {}", failure.name, failure.stage, failure.error);
        }
    }
}
