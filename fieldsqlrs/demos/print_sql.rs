use std::{env, fs, path::PathBuf};

use fieldsql::{CatalogRegistry, DialectKind, QueryRequest, SqlBuilder, StandardQueries};
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!("Usage: print_sql <catalog_dir> <request_json | standard_query_name> [dialect]");
    eprintln!("Example: cargo run --example print_sql -- demos/omop demos/requests/sex_distribution.json");
    eprintln!("Example: cargo run --example print_sql -- demos/omop \"Distribution of Age\" mssql");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let catalog_dir = PathBuf::from(args.remove(0));
    let target = args.remove(0);
    let dialect: DialectKind = match args.first() {
        Some(name) => name.parse()?,
        None => DialectKind::default(),
    };

    let registry = CatalogRegistry::load_from_dir(&catalog_dir)?;
    let request: QueryRequest = if target.ends_with(".json") {
        serde_json::from_str(&fs::read_to_string(&target)?)?
    } else {
        let queries = StandardQueries::from_file(catalog_dir.join("standard_queries.json"))?;
        queries
            .get(&target)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no standard query named '{target}'"))?
    };

    let sql = SqlBuilder::new(dialect).build(&registry, &request)?;
    println!("{sql}");
    Ok(())
}
