mod cli;

use std::collections::BTreeMap;
use std::sync::Arc;

use typedconf_core::logging::init_tracing;
use typedconf_core::sources::PathSegment;
use typedconf_core::{
    ConsulSource, EnvironmentSource, Error, FileFormat, FileSource, Result, Source,
};

fn main() -> Result<()> {
    let args = cli::Cli::parse_args();
    init_tracing(&args.log_level);

    let sources = build_sources(&args)?;
    if sources.is_empty() {
        return Err(Error::SourceConfig(
            "no sources selected; pass --env, --dotenv, --json, --toml, --ini or --consul"
                .to_owned(),
        ));
    }

    for source in &sources {
        print_source(source.as_ref())?;
    }
    print_merged(&sources)
}

fn build_sources(args: &cli::Cli) -> Result<Vec<Arc<dyn Source>>> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();

    if args.env {
        let source = match &args.env_namespace {
            Some(namespace) => EnvironmentSource::with_namespace(namespace),
            None => EnvironmentSource::new(),
        };
        sources.push(Arc::new(source));
    }

    for path in &args.dotenv {
        let mut builder = FileSource::builder(FileFormat::DotEnv).path(path);
        if let Some(prefix) = &args.dotenv_prefix {
            builder = builder.prefix(prefix);
        }
        sources.push(Arc::new(builder.build()?));
    }

    for path in &args.json {
        let mut builder = FileSource::builder(FileFormat::Json).path(path);
        if let Some(namespace) = &args.json_namespace {
            builder = builder.namespace(parse_namespace(namespace));
        }
        sources.push(Arc::new(builder.build()?));
    }

    for path in &args.toml {
        let mut builder = FileSource::builder(FileFormat::Toml).path(path);
        if let Some(namespace) = &args.toml_namespace {
            builder = builder.namespace(parse_namespace(namespace));
        }
        sources.push(Arc::new(builder.build()?));
    }

    for path in &args.ini {
        let mut builder = FileSource::builder(FileFormat::Ini).path(path);
        if let Some(section) = &args.ini_section {
            builder = builder.section(section);
        }
        sources.push(Arc::new(builder.build()?));
    }

    if let Some(root) = &args.consul {
        sources.push(Arc::new(ConsulSource::new(
            root,
            args.consul_namespace.as_deref(),
        )?));
    }

    Ok(sources)
}

/// Splits a dot-separated namespace; all-digit segments index into arrays.
fn parse_namespace(namespace: &str) -> Vec<PathSegment> {
    namespace
        .split('.')
        .map(|segment| match segment.parse::<usize>() {
            Ok(index) => PathSegment::Index(index),
            Err(_) => PathSegment::key(segment),
        })
        .collect()
}

fn print_source(source: &dyn Source) -> Result<()> {
    let keys = source.keys()?;
    println!("== {} ({} keys)", source.name(), keys.len());
    for key in keys {
        if let Some(value) = source.get(&key)? {
            println!("{key} = {value}");
        }
    }
    println!();
    Ok(())
}

fn print_merged(sources: &[Arc<dyn Source>]) -> Result<()> {
    let mut merged: BTreeMap<String, (String, String)> = BTreeMap::new();
    for source in sources {
        for key in source.keys()? {
            if let Some(value) = source.get(&key)? {
                merged.insert(key, (value.to_string(), source.name().to_owned()));
            }
        }
    }

    println!("== merged (last source wins)");
    for (key, (value, source_name)) in merged {
        println!("{key} = {value}  [{source_name}]");
    }
    Ok(())
}
