use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use ground_game::config::AppConfig;
use ground_game::geocoder::{FixtureGeocoder, Geocoder, TimeoutGeocoder};
use ground_game::logging::{init_logging, LogFormat, OperationTimer};
use ground_game::models::{ScoreId, User, UserId, VisitRequest};
use ground_game::repository::LeaderboardRepository;
use ground_game::{
    ChannelTaskQueue, Database, GroundGameError, LeaderboardAggregator, RankingQuery, SqliteRepository,
    VisitService,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    Everyone,
    State,
    Friends,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a visit from a JSON request
    Ingest {
        /// Acting user id
        #[arg(short, long)]
        user: UserId,

        /// Request file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        request: PathBuf,
    },
    /// Show a leaderboard around a user
    Leaderboard {
        /// User id
        #[arg(short, long)]
        user: UserId,

        /// Which board to show
        #[arg(long, value_enum, default_value = "everyone")]
        scope: Scope,

        /// State code, defaults to the user's own state
        #[arg(short, long)]
        state: Option<String>,
    },
    /// Rerun leaderboard aggregation for a score
    Recompute {
        /// Score id
        #[arg(short, long)]
        score: ScoreId,
    },
    /// Register a volunteer
    AddUser {
        #[arg(short, long)]
        email: String,

        /// Two-letter state code
        #[arg(short, long)]
        state: Option<String>,

        /// Use a fixed id instead of generating one
        #[arg(long)]
        id: Option<UserId>,
    },
    /// Connect two volunteers as friends
    Befriend { a: UserId, b: UserId },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let _guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(Path::new),
        LogFormat::from_setting(&config.logging.format),
    )?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let database = Database::new(&config.database).context("Failed to open database")?;
    let repo = SqliteRepository::shared(&database);
    let aggregator = Arc::new(LeaderboardAggregator::new(repo.clone(), repo.clone()));

    let outcome = match cli.command {
        Commands::Ingest { user, request } => ingest(&config, repo, aggregator, user, &request).await,
        Commands::Leaderboard { user, scope, state } => leaderboard(&config, repo, user, scope, state).await,
        Commands::Recompute { score } => aggregator.on_score_created(score).await.map_err(Into::into),
        Commands::AddUser { email, state, id } => {
            let mut user = User::new(email, state.map(|s| s.to_uppercase()));
            if let Some(id) = id {
                user.id = id;
            }
            repo.save_user(&user).await?;
            println!("{}", user.id);
            Ok(())
        }
        Commands::Befriend { a, b } => repo.add_friendship(a, b).await.map_err(Into::into),
        Commands::Config => Ok(()),
    };

    if let Err(err) = &outcome {
        if let Some(domain) = err.downcast_ref::<GroundGameError>() {
            eprintln!("{}", serde_json::to_string_pretty(&domain.report())?);
        }
    }
    outcome
}

fn load_geocoder(config: &AppConfig) -> Result<Arc<dyn Geocoder>> {
    let path = Path::new(&config.geocoder.fixture_path);
    let fixtures = if path.exists() {
        FixtureGeocoder::from_file(path)?
    } else {
        warn!(path = %path.display(), "Geocoder fixture file not found, every lookup will miss");
        FixtureGeocoder::default()
    };
    Ok(Arc::new(TimeoutGeocoder::new(
        fixtures,
        Duration::from_millis(config.geocoder.timeout_ms),
    )))
}

fn read_request(file: &Path) -> Result<VisitRequest> {
    let mut contents = String::new();
    if file == Path::new("-") {
        std::io::stdin().read_to_string(&mut contents)?;
    } else {
        contents = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    }
    serde_json::from_str(&contents).context("Invalid visit request")
}

/// Record one visit and wait for its leaderboard update
async fn ingest(
    config: &AppConfig,
    repo: Arc<SqliteRepository>,
    aggregator: Arc<LeaderboardAggregator>,
    user: UserId,
    file: &Path,
) -> Result<()> {
    let timer = OperationTimer::new("cli_ingest");
    let request = read_request(file)?;
    let queue = Arc::new(ChannelTaskQueue::spawn_worker(aggregator, config.queue));
    let service = VisitService::new(repo.clone(), repo, load_geocoder(config)?, queue.clone(), config);

    let result = service.ingest(&request, user).await;
    queue.shutdown().await?;
    let ingested = result?;

    println!("{}", serde_json::to_string_pretty(&ingested)?);
    info!(visit_id = %ingested.visit.id, duration_ms = timer.finish(), "Ingest command finished");
    Ok(())
}

async fn leaderboard(
    config: &AppConfig,
    repo: Arc<SqliteRepository>,
    user: UserId,
    scope: Scope,
    state: Option<String>,
) -> Result<()> {
    let query = RankingQuery::new(repo.clone(), config.leaderboard.window);
    let rows = match scope {
        Scope::Everyone => query.for_everyone(user).await?,
        Scope::Friends => query.for_friends(user).await?,
        Scope::State => {
            let state_code = match state {
                Some(code) => code.to_uppercase(),
                None => repo
                    .find_user(user)
                    .await?
                    .and_then(|u| u.state_code)
                    .context("User has no state; pass --state")?,
            };
            query.for_state(user, &state_code).await?
        }
    };

    for row in rows {
        let marker = if row.user_id == user { "*" } else { " " };
        println!("{marker}{:>4}  {:>6}  {}", row.rank, row.score, row.user_id);
    }
    Ok(())
}
