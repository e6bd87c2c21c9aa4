use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Compute mapped records and build batched SQL loads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a load through the dry-run executor and print the result as JSON
    Load(LoadArgs),
    /// Show the statement and batch strategy a configuration uses for N rows
    Plan(PlanArgs),
    /// Evaluate an arithmetic expression against named values
    Eval(EvalArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["config", "config_dir"])))]
pub struct LoadArgs {
    /// Load configuration YAML file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory of `<id>.yaml` configurations (requires --id)
    #[arg(long = "config-dir", requires = "id")]
    pub config_dir: Option<PathBuf>,
    /// Configuration id to look up in --config-dir
    #[arg(long)]
    pub id: Option<String>,
    /// Source records: JSON array, .csv or .tsv (`-` reads JSON from stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Insert with generated-key retrieval instead of a plain load
    #[arg(long)]
    pub keyed: bool,
    /// Re-chunk a keyed insert into sub-batches of this size
    #[arg(long = "chunk-size", value_parser = parse_positive)]
    pub chunk_size: Option<usize>,
    /// Include every executed statement and its parameters in the output
    #[arg(long = "show-statements")]
    pub show_statements: bool,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Load configuration YAML file
    #[arg(short, long)]
    pub config: PathBuf,
    /// Number of rows in the batch (defaults to the configured batch size)
    #[arg(long, value_parser = parse_positive)]
    pub rows: Option<usize>,
    /// Override the configured dialect
    #[arg(long)]
    pub dialect: Option<String>,
}

#[derive(Debug, Args)]
pub struct EvalArgs {
    /// Expression such as `(price + tax) * qty`
    pub expression: String,
    /// Field values as `name=value`
    #[arg(long = "var", value_parser = parse_assignment, action = clap::ArgAction::Append)]
    pub vars: Vec<(String, String)>,
    /// Fractional digits kept in the result
    #[arg(long, default_value_t = 2)]
    pub scale: u32,
    /// List the referenced field names instead of evaluating
    #[arg(long)]
    pub fields: bool,
}

pub fn parse_assignment(value: &str) -> Result<(String, String), String> {
    let (name, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected name=value but got '{value}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("Variable name cannot be empty".to_string());
    }
    Ok((name.to_string(), raw.trim().to_string()))
}

pub fn parse_positive(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("Value must be greater than zero".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("'{value}' is not a positive integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(
            parse_assignment("note = a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn positive_rejects_zero() {
        assert_eq!(parse_positive("25").unwrap(), 25);
        assert!(parse_positive("0").is_err());
        assert!(parse_positive("-1").is_err());
    }

    #[test]
    fn load_requires_a_config_source() {
        assert!(Cli::try_parse_from(["batch-loader", "load", "-i", "rows.json"]).is_err());
        assert!(
            Cli::try_parse_from(["batch-loader", "load", "--config-dir", "cfg", "-i", "rows.json"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["batch-loader", "load", "-c", "orders.yaml", "-i", "rows.json"])
                .is_ok()
        );
    }
}
