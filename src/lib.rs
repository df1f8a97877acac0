pub mod cache;
pub mod catalog;
pub mod cli;
pub mod compiler;
pub mod constructor;
pub mod conversion;
pub mod csv_cursor;
pub mod data;
pub mod error;
pub mod expr;
pub mod io_utils;
pub mod mapper;
pub mod options;
pub mod plan;
pub mod record;
pub mod shape;
pub mod table;
pub mod types;

pub use cache::MapperCache;
pub use data::{Object, Value, from_value};
pub use error::MapError;
pub use mapper::{CompiledMapper, MappedRows, RowMapper};
pub use options::{Factory, MappingOptions, TypeSettings};
pub use record::{ColumnSpec, MemoryCursor, Record, ResultSet, RowCursor};
pub use shape::Shape;
pub use types::{ObjectType, TargetType, TypeRef, ValueType};

use std::{
    env,
    io::{self, BufWriter, Write},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::catalog::ColumnCatalog;
use crate::cli::{Cli, Commands};
use crate::csv_cursor::{ColumnTypes, CsvCursor, parse_column_types};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("rowshape", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Map(args) => handle_map(&args),
        Commands::Columns(args) => handle_columns(&args),
    }
}

fn handle_map(args: &cli::MapArgs) -> Result<()> {
    let shape = Shape::load(&args.shape)?;
    let mut options = shape.options().clone();
    if let Some(separator) = &args.separator {
        options = options.with_separator(separator.clone());
    }
    let types: ColumnTypes = if args.types.is_empty() {
        shape
            .column_types()
            .iter()
            .map(|(name, ty)| (name.clone(), *ty))
            .collect()
    } else {
        parse_column_types(&args.types)?
    };
    debug!("Column types: {types:?}");

    let mut cursor = CsvCursor::open(&args.input, args.delimiter, &types)?;
    info!(
        "Mapping '{}' ({} column(s)) to {}",
        args.input.display(),
        cursor.columns().len(),
        shape.root()
    );

    let mapper = RowMapper::global();
    let compiled = mapper
        .get_mapper(shape.root(), &cursor, &options)
        .with_context(|| format!("Compiling mapper for {}", shape.root()))?;
    if args.explain {
        eprintln!("{}", compiled.describe());
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut count = 0usize;
    for mapped in mapper.map_rows(&mut cursor, shape.root().clone(), options) {
        let value = mapped.with_context(|| format!("Mapping row {}", count + 1))?;
        if args.pretty {
            serde_json::to_writer_pretty(&mut out, &value)?;
        } else {
            serde_json::to_writer(&mut out, &value)?;
        }
        writeln!(out)?;
        count += 1;
    }
    out.flush().context("Flushing output")?;
    info!("Mapped {count} row(s)");
    Ok(())
}

fn handle_columns(args: &cli::ColumnsArgs) -> Result<()> {
    let types = parse_column_types(&args.types)?;
    let cursor = CsvCursor::open(&args.input, args.delimiter, &types)?;
    let catalog = ColumnCatalog::from_specs(cursor.columns());
    print!("{}", table::catalog_table(&catalog, &args.separator));
    info!("Listed {} column(s)", catalog.len());
    Ok(())
}
