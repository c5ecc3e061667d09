use anyhow::{bail, Context};
use clap::Parser;
use iqrscope::detector::{CategoryFilter, DetectOpts};
use iqrscope::export::{self, ReportSummary};
use iqrscope::loader::{self, InputFormat};
use iqrscope::processor::{self, AnomalyReport, BatchOpts, ColumnQuery};
use iqrscope::stats::DEFAULT_IQR_MULTIPLIER;
use iqrscope::table::Dataset;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Once;

fn init_parallelism() {
    static START: Once = Once::new();
    START.call_once(|| {
        let n = num_cpus::get();
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    });
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).try_init();
}

#[derive(Parser, Debug)]
#[command(name = "iqrscope", version, about = "IQR outlier detection for tabular data")]
struct Cli {
    /// Input file (`-` for stdin). JSON / JSON lines, `.csv`, `.tsv` or an Excel workbook.
    #[arg(default_value = "-")]
    input: String,

    /// Format of stdin input: json | csv | tsv | xlsx
    #[arg(long = "input-format", default_value = "json")]
    input_format: String,

    /// Analyse one column (with optional grouping and filters) instead of every numeric column
    #[arg(long = "column", short = 'c')]
    column: Option<String>,

    /// IQR multiplier for derived thresholds
    #[arg(long = "multiplier", short = 'k', default_value_t = DEFAULT_IQR_MULTIPLIER)]
    multiplier: f64,

    // Single-column options
    #[arg(long = "lower", allow_negative_numbers = true)] lower: Option<f64>,
    #[arg(long = "upper", allow_negative_numbers = true)] upper: Option<f64>,
    /// Group column. May be repeated.
    #[arg(long = "group-by")]
    group_by: Vec<String>,
    /// Category filter as `column=a,b`. May be repeated.
    #[arg(long = "filter")]
    filter: Vec<String>,

    /// Output: summary | json | jsonl | csv | table
    #[arg(long = "format", default_value = "summary")]
    format: String,
    /// Write to a file instead of stdout
    #[arg(long = "output", short = 'o')]
    output: Option<PathBuf>,
    /// Process columns one at a time
    #[arg(long = "sequential", default_value_t = false)]
    sequential: bool,
    #[arg(long = "verbose", short = 'v', default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    init_parallelism();

    let dataset = load_input(&cli)?;

    let report = if let Some(column) = cli.column.as_deref() {
        let query = ColumnQuery {
            column: column.to_string(),
            multiplier: cli.multiplier,
            lower: cli.lower,
            upper: cli.upper,
            opts: DetectOpts {
                group_columns: cli.group_by.clone(),
                categories: parse_filters(&cli.filter)?,
            },
        };
        let result = processor::analyze_column(&dataset, &query)
            .with_context(|| format!("analysing column {column}"))?;
        AnomalyReport::new(&dataset, vec![result])
    } else {
        if !cli.group_by.is_empty() || !cli.filter.is_empty() || cli.lower.is_some() || cli.upper.is_some() {
            bail!("--group-by, --filter, --lower and --upper require --column");
        }
        let opts = BatchOpts { multiplier: cli.multiplier, parallel: !cli.sequential };
        processor::process_all(&dataset, &opts)
    };

    let out: Box<dyn Write> = match &cli.output {
        Some(path) => {
            let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            Box::new(BufWriter::new(f))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    emit(out, &report, &cli.format)
}

fn load_input(cli: &Cli) -> anyhow::Result<Dataset> {
    if cli.input == "-" {
        let format = match cli.input_format.as_str() {
            "json" | "jsonl" => InputFormat::Json,
            "csv" => InputFormat::Csv,
            "tsv" => InputFormat::Tsv,
            "xlsx" | "xls" | "excel" => InputFormat::Excel,
            other => bail!("unknown input format: {other}"),
        };
        return loader::load_reader(io::stdin().lock(), format).context("reading stdin");
    }
    loader::load_path(Path::new(&cli.input)).with_context(|| format!("loading {}", cli.input))
}

fn parse_filters(raw_filters: &[String]) -> anyhow::Result<CategoryFilter> {
    let mut filter = CategoryFilter::new();
    for raw in raw_filters {
        let Some((column, values)) = raw.split_once('=') else {
            bail!("filter must look like column=a,b: {raw}");
        };
        let values: Vec<&str> = values.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
        filter.insert(column.trim(), values);
    }
    Ok(filter)
}

fn emit<W: Write>(mut w: W, report: &AnomalyReport<'_>, format: &str) -> anyhow::Result<()> {
    match format {
        "summary" => {
            serde_json::to_writer_pretty(&mut w, &ReportSummary::from_report(report))?;
            writeln!(w)?;
        }
        "json" => export::write_json(&mut w, &export::merged_table(report)?)?,
        "jsonl" => export::write_json_lines(&mut w, &export::merged_table(report)?)?,
        "csv" => export::write_csv(&mut w, &export::merged_table(report)?)?,
        "table" => print_table(&mut w, report)?,
        other => bail!("unknown output format: {other}"),
    }
    w.flush()?;
    Ok(())
}

fn print_table<W: Write>(w: &mut W, report: &AnomalyReport<'_>) -> io::Result<()> {
    writeln!(w, "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>6}", "Column", "Q1", "Q3", "IQR", "Lower", "Upper", "Count")?;
    for c in &report.columns {
        writeln!(
            w,
            "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>6}",
            c.column,
            c.stats.q1,
            c.stats.q3,
            c.stats.iqr,
            c.thresholds.lower,
            c.thresholds.upper,
            c.anomalies.len()
        )?;
    }
    if report.merged.is_empty() {
        return Ok(());
    }
    writeln!(w, "\n{:<6} {:<28} Row", "Index", "Anomaly")?;
    for r in &report.merged {
        let cells: Vec<String> = r.row.iter().map(|v| v.label().unwrap_or_default()).collect();
        writeln!(w, "{:<6} {:<28} {}", r.row_index, r.marker, cells.join(" | "))?;
    }
    Ok(())
}
