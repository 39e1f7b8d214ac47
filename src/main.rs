use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muze_kb::config::{AppConfig, CliConfig, FileConfig, DEFAULT_MAX_HOPS, DEFAULT_READ_POOL_SIZE};
use muze_kb::knowledge_base::{
    AudioFeatures, EntityId, EntityType, KnowledgeBase, NameMatching, NewSong, RelationType,
    SqliteKnowledgeBase,
};
use muze_kb::recommend::{AdjectiveTable, CandidateOrder, RecommendationEngine};
use muze_kb::seed::{import_seed, SeedFile};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "muze-kb")]
#[command(about = "Music knowledge graph and recommendation engine")]
struct CliArgs {
    /// Path to the SQLite knowledge base file.
    #[clap(long = "db", global = true, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Number of read-only database connections.
    #[clap(long, global = true, default_value_t = DEFAULT_READ_POOL_SIZE)]
    pub read_pool_size: usize,

    /// How names given on the command line are matched: exact or contains.
    #[clap(long, global = true, default_value = "exact")]
    pub name_matching: NameMatching,

    /// Order in which candidate songs are tested: insertion or shuffled.
    #[clap(long, global = true, default_value = "insertion")]
    pub candidate_order: CandidateOrder,

    /// Number of "similar to" hops searched beyond the song's own artist.
    #[clap(long, global = true, default_value_t = DEFAULT_MAX_HOPS)]
    pub max_hops: usize,

    /// Seed for random picks, for reproducible output.
    #[clap(long, global = true)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database if needed, optionally loading a seed file.
    Init {
        #[clap(long = "seed-file", value_parser = parse_path)]
        seed_file: Option<PathBuf>,
    },
    /// Load a JSON seed file into an existing database.
    Import {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },
    /// Show the songs matching a name.
    Song {
        name: String,
        #[clap(long)]
        id: Option<EntityId>,
    },
    /// Show the artists matching a name.
    Artist { name: String },
    /// List the songs of an artist.
    SongsBy { artist: String },
    /// List entities related to a name.
    Related {
        name: String,
        #[clap(long, default_value = "similar to")]
        relation: String,
    },
    /// List entity ids matching a name, by type.
    Ids { name: String },
    /// List all song names.
    Songs,
    /// List all artist names.
    Artists,
    /// Songs less popular than the given one.
    LessPopular { song: String },
    /// Find songs that are <ADJECTIVE> than the given song.
    Recommend {
        song: String,
        adjective: String,
        #[clap(long, default_value_t = 1)]
        limit: usize,
    },
    /// Find a song similar to the given one.
    Similar { song: String },
    /// Streaming URI of a random song.
    RandomSong,
    /// Whether song A is <ADJECTIVE> than song B (by id).
    Compare {
        a: EntityId,
        b: EntityId,
        adjective: String,
    },
    AddArtist {
        name: String,
        #[clap(long = "genre")]
        genres: Vec<String>,
        #[clap(long)]
        followers: Option<i64>,
    },
    AddSong {
        name: String,
        artist: String,
        #[clap(long)]
        duration_ms: Option<i64>,
        #[clap(long)]
        popularity: Option<i64>,
        #[clap(long)]
        spotify_uri: Option<String>,
        /// Audio features as a JSON object, e.g. '{"valence": 0.4}'.
        #[clap(long)]
        features: Option<String>,
    },
    AddGenre { name: String },
    /// Add an entity with no attributes.
    AddEntity { name: String, entity_type: String },
    Connect {
        source: String,
        dest: String,
        #[clap(long, default_value = "similar to")]
        relation: String,
        #[clap(long, default_value_t = 100, allow_negative_numbers = true)]
        score: i64,
    },
    /// List the known adjectives.
    Adjectives,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_features(raw: Option<&str>) -> Result<AudioFeatures> {
    let Some(raw) = raw else {
        return Ok(AudioFeatures::default());
    };
    let map: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw).context("--features must be a JSON object")?;
    Ok(AudioFeatures::from_raw(&map)?)
}

fn run(command: Command, kb: Arc<SqliteKnowledgeBase>, engine: &RecommendationEngine) -> Result<()> {
    match command {
        Command::Init { seed_file } => {
            if let Some(path) = seed_file {
                let stats = import_seed(kb.as_ref(), &SeedFile::load(&path)?)?;
                print_json(&stats)?;
            }
            let counts: BTreeMap<String, usize> = EntityType::ALL
                .iter()
                .map(|t| Ok((t.to_string(), kb.entity_count(*t)?)))
                .collect::<Result<_>>()?;
            print_json(&counts)
        }
        Command::Import { file } => {
            let stats = import_seed(kb.as_ref(), &SeedFile::load(&file)?)?;
            print_json(&stats)
        }
        Command::Song { name, id } => print_json(&kb.song_data(Some(&name), id)?),
        Command::Artist { name } => print_json(&kb.artist_data(&name)?),
        Command::SongsBy { artist } => match kb.songs_by_artist(&artist) {
            Ok(songs) => print_json(&songs),
            Err(e) if e.is_not_found() || e.is_ambiguous() => {
                let status = if e.is_ambiguous() { "ambiguous" } else { "not_found" };
                print_json(&json!({ "artist": artist, "status": status, "message": e.to_string() }))
            }
            Err(e) => Err(e.into()),
        },
        Command::Related { name, relation } => {
            print_json(&kb.related_entities(&name, &RelationType::from(relation))?)
        }
        Command::Ids { name } => print_json(&kb.node_ids_by_type(&name)?),
        Command::Songs => print_json(&kb.all_song_names()?),
        Command::Artists => print_json(&kb.all_artist_names()?),
        Command::LessPopular { song } => print_json(&kb.less_popular_songs(&song)?),
        Command::Recommend {
            song,
            adjective,
            limit,
        } => print_json(&engine.find_recommendations(&song, &adjective, limit)?),
        Command::Similar { song } => print_json(&engine.find_similar_song(&song)?),
        Command::RandomSong => print_json(&engine.random_song_uri()?),
        Command::Compare { a, b, adjective } => print_json(&engine.compare(a, b, &adjective)?),
        Command::AddArtist {
            name,
            genres,
            followers,
        } => {
            let id = kb.add_artist(&name, &genres, followers)?;
            print_json(&json!({ "id": id }))
        }
        Command::AddSong {
            name,
            artist,
            duration_ms,
            popularity,
            spotify_uri,
            features,
        } => {
            let song = NewSong {
                duration_ms,
                popularity,
                spotify_uri,
                audio_features: parse_features(features.as_deref())?,
            };
            let id = kb.add_song(&name, &artist, &song)?;
            print_json(&json!({ "id": id }))
        }
        Command::AddGenre { name } => {
            let id = kb.add_genre(&name)?;
            print_json(&json!({ "id": id }))
        }
        Command::AddEntity { name, entity_type } => {
            let id = kb.add_entity(&name, entity_type.parse()?)?;
            print_json(&json!({ "id": id }))
        }
        Command::Connect {
            source,
            dest,
            relation,
            score,
        } => {
            kb.connect(&source, &dest, &RelationType::from(relation), score)?;
            print_json(&json!({ "connected": true }))
        }
        Command::Adjectives => {
            let table: BTreeMap<&str, _> = engine.adjectives().iter().collect();
            print_json(&table)
        }
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_path: cli_args.db_path.clone(),
        read_pool_size: cli_args.read_pool_size,
        name_matching: cli_args.name_matching,
        candidate_order: cli_args.candidate_order,
        max_hops: cli_args.max_hops,
        rng_seed: cli_args.seed,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening knowledge base at {:?}...", config.db_path);
    let kb = Arc::new(SqliteKnowledgeBase::new(
        &config.db_path,
        config.read_pool_size,
        config.name_matching,
    )?);

    let engine = RecommendationEngine::new(
        kb.clone(),
        Arc::new(AdjectiveTable::standard()),
        config.rng(),
    )
    .with_candidate_order(config.candidate_order)
    .with_max_hops(config.max_hops);

    run(cli_args.command, kb, &engine)
}
