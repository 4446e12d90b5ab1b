//! Post-processing benchmark over a synthetic directory graph.
//! Run with: cargo run --release --bin post-bench -- --users 20000

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use penumbra::ad::schema::{node, prop, rel};
use penumbra::graph::{GraphStore, GraphStoreExt, MemoryGraph, Properties, WriteTransaction};
use penumbra::types::{Kind, Kinds, NodeId, Result};
use penumbra::{run_post_processing, AnalysisConfig};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DOMAIN_SID: &str = "S-1-5-21-4242";
const DOMAIN_NAME: &str = "BENCH.LOCAL";

#[derive(Parser, Debug)]
#[command(name = "post-bench", version, about = "Times the post-processing pipeline on generated data")]
struct Args {
    #[arg(long, default_value_t = 5_000, help = "Number of users")]
    users: usize,

    #[arg(long, default_value_t = 500, help = "Number of security groups")]
    groups: usize,

    #[arg(long, default_value_t = 1_000, help = "Number of computers")]
    computers: usize,

    #[arg(long, default_value_t = 3, help = "Group memberships per principal")]
    fan_out: usize,

    #[arg(long, default_value_t = 7, help = "Generator seed")]
    seed: u64,

    #[arg(long, value_name = "FILE", env = "PENUMBRA_CONFIG", help = "Analysis configuration (TOML)")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the number of concurrent readers")]
    readers: Option<usize>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("penumbra=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()?;

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::throughput(),
    };
    if let Some(readers) = args.readers {
        config.num_readers = readers;
    }
    config.validate()?;

    let graph = Arc::new(MemoryGraph::new());
    let generate_start = Instant::now();
    graph.write(&CancellationToken::new(), |tx| generate(tx, &args))?;
    let generated = graph.stats();
    let generate_elapsed = generate_start.elapsed();

    let db: Arc<dyn GraphStore> = graph.clone();
    let run_start = Instant::now();
    let report = run_post_processing(&CancellationToken::new(), &db, &config)?;
    let run_elapsed = run_start.elapsed();

    let passes: Vec<_> = report
        .passes
        .iter()
        .map(|pass| {
            json!({
                "pass": pass.pass.name(),
                "created": pass.stats.total_created(),
                "refreshed": pass.stats.relationships_refreshed,
                "readers": pass.readers_run,
                "elapsed_ms": pass.elapsed.as_secs_f64() * 1e3,
            })
        })
        .collect();
    let summary = json!({
        "seed": args.seed,
        "config": config,
        "generated": {
            "nodes": generated.nodes,
            "relationships": generated.relationships,
            "elapsed_ms": generate_elapsed.as_secs_f64() * 1e3,
        },
        "bootstrap": report.bootstrap,
        "groups_resolved": report.groups_resolved,
        "deleted": report.relationships_deleted,
        "created": report.stats().relationships_created,
        "passes": passes,
        "elapsed_ms": run_elapsed.as_secs_f64() * 1e3,
        "relationships_after": graph.stats().relationships,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn principal(tx: &mut dyn WriteTransaction, kind: Kind, name: String, rid: usize) -> Result<NodeId> {
    let properties = Properties::new()
        .with(prop::NAME, name)
        .with(prop::OBJECT_ID, format!("{DOMAIN_SID}-{rid}"))
        .with(prop::DOMAIN_SID, DOMAIN_SID);
    tx.create_node(Kinds::from([kind]), properties).map(|created| created.id)
}

fn link(tx: &mut dyn WriteTransaction, from: NodeId, to: NodeId, kind: Kind) -> Result<()> {
    tx.create_relationship_by_ids(from, to, kind, Properties::new()).map(|_| ())
}

/// One domain with nested groups, computers carrying a local Administrators
/// group, an OU tree with linked GPOs and a handful of replication rights.
fn generate(tx: &mut dyn WriteTransaction, args: &Args) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let domain = tx
        .create_node(
            Kinds::from([node::DOMAIN]),
            Properties::new()
                .with(prop::NAME, DOMAIN_NAME)
                .with(prop::OBJECT_ID, DOMAIN_SID)
                .with(prop::DOMAIN_SID, DOMAIN_SID)
                .with(prop::COLLECTED, true),
        )?
        .id;

    let mut rid = 1_000;
    let mut groups = Vec::with_capacity(args.groups);
    for index in 0..args.groups {
        rid += 1;
        let group = principal(tx, node::GROUP, format!("GROUP{index}@{DOMAIN_NAME}"), rid)?;
        // Nest into earlier groups only, plus the occasional back edge to form cycles.
        if let Some(parent) = groups.choose(&mut rng).copied() {
            link(tx, group, parent, rel::MEMBER_OF)?;
            if rng.gen_ratio(1, 50) {
                link(tx, parent, group, rel::MEMBER_OF)?;
            }
        }
        groups.push(group);
    }

    for index in 0..args.users {
        rid += 1;
        let user = principal(tx, node::USER, format!("USER{index}@{DOMAIN_NAME}"), rid)?;
        for &group in groups.choose_multiple(&mut rng, args.fan_out) {
            link(tx, user, group, rel::MEMBER_OF)?;
        }
    }

    let ou = tx
        .create_node(
            Kinds::from([node::OU]),
            Properties::new().with(prop::NAME, format!("WORKSTATIONS@{DOMAIN_NAME}")),
        )?
        .id;
    link(tx, domain, ou, rel::CONTAINS)?;
    let gpo = tx
        .create_node(
            Kinds::from([node::GPO]),
            Properties::new().with(prop::NAME, format!("BASELINE@{DOMAIN_NAME}")),
        )?
        .id;
    link(tx, gpo, ou, rel::GP_LINK)?;

    for index in 0..args.computers {
        rid += 1;
        let name = format!("WS{index}.{DOMAIN_NAME}");
        let computer = principal(tx, node::COMPUTER, name.clone(), rid)?;
        link(tx, ou, computer, rel::CONTAINS)?;
        let admins = tx
            .create_node(
                Kinds::from([node::LOCAL_GROUP]),
                Properties::new()
                    .with(prop::NAME, format!("ADMINISTRATORS@{name}"))
                    .with(prop::OBJECT_ID, format!("{name}-S-1-5-32-544")),
            )?
            .id;
        link(tx, admins, computer, rel::LOCAL_TO_COMPUTER)?;
        if let Some(&group) = groups.choose(&mut rng) {
            link(tx, group, admins, rel::MEMBER_OF_LOCAL_GROUP)?;
        }
    }

    for &group in groups.choose_multiple(&mut rng, 4) {
        link(tx, group, domain, rel::GET_CHANGES)?;
        if rng.gen_bool(0.5) {
            link(tx, group, domain, rel::GET_CHANGES_ALL)?;
        }
    }
    Ok(())
}
