use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, load_settings_from, AppState, Coordinator, DashboardHandle, UploadFile,
    UploadPhase, UploadProgress,
};
use shared::domain::{Company, CompanyId, FiscalYear, SeveritySummary, StatementRecord};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fin-report", about = "Financial report dashboard client")]
struct Cli {
    /// Overrides the configured server URL.
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Config file; defaults to ./fin-report.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List companies with extracted reports.
    Companies,
    /// Show statements, trends and QA findings for a company.
    Show {
        company_id: String,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Upload a PDF report and follow its processing.
    Upload { path: PathBuf },
    /// Search report passages.
    Search {
        query: String,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings()?,
    };
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    info!(server_url = %settings.server_url, "cli: starting");
    let coordinator = Coordinator::from_settings(&settings)?;

    match cli.command {
        Command::Companies => {
            coordinator.load_companies().await?;
            let state = coordinator.snapshot();
            if state.companies.is_empty() {
                println!("no companies yet; upload a report first");
            }
            for company in &state.companies {
                println!("{}\t{}", company.id, company.name);
            }
        }
        Command::Show { company_id, year } => {
            coordinator.load_companies().await?;
            let company = find_company(&coordinator.snapshot(), &company_id)?;
            coordinator.select_company(company).await?;
            if let Some(year) = year {
                coordinator.select_year(FiscalYear(year)).await?;
            }
            print_selection(&coordinator.snapshot());
        }
        Command::Upload { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let outcome = upload(&coordinator, UploadFile::pdf(filename, bytes))
                .await?;
            match outcome.phase {
                UploadPhase::Completed => {
                    println!("processed ({})", outcome.status);
                    if let Some(warning) = outcome.warning {
                        println!("warning: {warning}");
                    }
                }
                UploadPhase::Cancelled => println!("cancelled"),
                _ => {
                    return Err(anyhow!(outcome
                        .error
                        .unwrap_or_else(|| "upload failed".to_string())))
                }
            }
        }
        Command::Search {
            query,
            company,
            year,
        } => {
            let company = company.map(CompanyId::new);
            let results = coordinator
                .search(&query, company.as_ref(), year.map(FiscalYear))
                .await?;
            if results.is_empty() {
                println!("no matches");
            }
            for result in results {
                let page = result
                    .page_no
                    .map(|page| format!(" p.{page}"))
                    .unwrap_or_default();
                println!(
                    "[{:.3}] {} {} {}{page}\n    {}",
                    result.score, result.company_id, result.year, result.section, result.text
                );
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

async fn upload(coordinator: &Arc<Coordinator>, file: UploadFile) -> Result<UploadProgress> {
    let mut state_rx = coordinator.subscribe_state();
    let handle = coordinator.upload_file(file).await?;

    let printer = tokio::spawn(async move {
        let mut last = None;
        while state_rx.changed().await.is_ok() {
            let Some(upload) = state_rx.borrow_and_update().upload.clone() else {
                continue;
            };
            let line = (upload.percent(), upload.status.clone());
            if last.as_ref() != Some(&line) {
                eprintln!("{:>3}% {}", line.0, line.1);
                last = Some(line);
            }
            if upload.phase.is_terminal() {
                break;
            }
        }
    });

    let waiter = handle.wait();
    tokio::pin!(waiter);
    let finished = tokio::select! {
        outcome = &mut waiter => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            eprintln!("cancelling upload...");
            coordinator.cancel_upload().await;
            waiter.await
        }
    };
    printer.abort();
    Ok(outcome)
}

fn find_company(state: &AppState, company_id: &str) -> Result<Company> {
    state
        .companies
        .iter()
        .find(|company| company.id.as_str().eq_ignore_ascii_case(company_id))
        .cloned()
        .ok_or_else(|| anyhow!("unknown company {company_id}"))
}

fn print_selection(state: &AppState) {
    let Some(company) = &state.selected_company else {
        return;
    };
    let years: Vec<String> = state
        .available_years
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("{} ({})", company.name, company.id);
    println!("years: {}", years.join(", "));
    let Some(year) = state.selected_year else {
        println!("no reporting years available");
        return;
    };
    println!("year: {year}");

    if let Some(financial) = &state.financial_data {
        print_record("income", &financial.income);
        print_record("balance", &financial.balance);
        print_record("cashflow", &financial.cashflow);
        print_record("ratios", &financial.ratios);
    }
    if let Some(trends) = &state.trends_data {
        let covered: Vec<String> = trends.years().iter().map(ToString::to_string).collect();
        println!("trend years: {}", covered.join(", "));
    }

    let summary = SeveritySummary::from_findings(&state.qa_findings);
    println!(
        "qa findings: {} (high {}, medium {}, low {})",
        summary.total(),
        summary.high,
        summary.medium,
        summary.low
    );
    for finding in &state.qa_findings {
        println!(
            "  [{}] {} {}: {}",
            finding.severity, finding.rule_id, finding.rule_name, finding.details
        );
    }
}

fn print_record(label: &str, record: &StatementRecord) {
    if record.is_empty() {
        println!("{label}: not extracted");
        return;
    }
    println!("{label}:");
    for name in record.metric_names() {
        match record.value(name) {
            Some(value) => println!("  {name}: {value}"),
            None => println!("  {name}: n/a"),
        }
    }
}
