use crate::backend::PkiBackend;
use crate::ca::{CaSigner, EcdsaCaSigner, UnconfiguredSigner};
use crate::cert::{CertificateEntry, SerialNumber};
use crate::cli::args::*;
use crate::cli::completions;
use crate::config::BackendConfig;
use crate::revocation::{
    spawn_periodic, RevocationRecord, RevocationStatus, RevokeResponse, TidyOutcome, TidyParams,
    TidyReport,
};
use crate::storage::LocalStorage;
use crate::utils::errors::{PkiError, Result};
use crate::utils::output::OutputFormat;
use crate::utils::pem::{self, CRL_LABEL};
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

pub async fn handle_command(cli: Cli) -> Result<()> {
    // Initialize logging - always to stderr
    if !cli.quiet {
        let log_level = match cli.verbose {
            0 => "pki_revocation=warn",  // Default: warnings only
            1 => "pki_revocation=info",  // -v: info level
            2 => "pki_revocation=debug", // -vv: debug level
            _ => "pki_revocation=trace", // -vvv+: trace level
        };

        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(log_level)
            .init();
    }

    let output = OutputFormat::new(cli.raw);

    if let Commands::Completion { ref command } = cli.command {
        return completions::handle_completion_command(command);
    }

    let mut config = BackendConfig::load(cli.config.as_deref())?;
    if let Some(storage) = &cli.storage {
        config.storage_dir = Some(storage.display().to_string());
    }
    if let Some(ca_key) = &cli.ca_key {
        config.ca_key_path = Some(ca_key.display().to_string());
    }
    let backend = Arc::new(build_backend(&config)?);

    match cli.command {
        Commands::Revoke { serial } => {
            let response = backend.revoke(&serial).await?;
            output.print_key_value(&revoke_rows(&response));
            Ok(())
        }
        Commands::Tidy(args) => {
            let params = tidy_params(&args, &backend);
            match backend.tidy(&params).await? {
                TidyOutcome::Skipped => {
                    println!("Tidy already running, nothing done");
                }
                TidyOutcome::Completed(report) => {
                    output.print_key_value(&tidy_rows(&report));
                    for err in &report.errors {
                        eprintln!("Error: {err}");
                    }
                }
            }
            Ok(())
        }
        Commands::Crl { command } => handle_crl_command(command, &backend, &output).await,
        Commands::Cert { command } => handle_cert_command(command, &backend, &output).await,
        Commands::Revoked { command } => match command {
            RevokedCommands::List => {
                let records = backend.list_revoked().await?;
                output.print_table(&revoked_table(&records));
                Ok(())
            }
        },
        Commands::Serve { tick } => {
            let every = match tick {
                Some(0) => {
                    return Err(PkiError::InvalidInput(
                        "tick must be greater than zero".to_string(),
                    ))
                }
                Some(secs) => std::time::Duration::from_secs(secs),
                None => config.periodic_tick(),
            };
            let handle = spawn_periodic(backend.clone(), every);
            tokio::signal::ctrl_c().await?;
            tracing::info!("Interrupt received, stopping scheduler");
            handle.shutdown().await;
            Ok(())
        }
        Commands::CompletionHelper { command } => match command {
            CompletionHelperCommands::Serials => {
                for entry in backend.list_certificates().await? {
                    println!("{}", entry.serial);
                }
                Ok(())
            }
        },
        Commands::Completion { .. } => Ok(()),
    }
}

/// Open storage and CA material as configured.
///
/// A missing CA key leaves the backend usable for listings and tidy; anything
/// that signs a CRL then fails with a signing error.
pub fn build_backend(config: &BackendConfig) -> Result<PkiBackend> {
    let storage = LocalStorage::new(config.storage_dir()?)?;
    tracing::debug!("Using storage at {}", storage.root().display());

    let key_path = config.ca_key_path()?;
    let signer: Arc<dyn CaSigner> = if key_path.exists() {
        let mut signer = EcdsaCaSigner::load(&key_path, config.issuer.clone())?;
        if let Some(serial) = &config.ca_serial {
            signer = signer.with_ca_serial(SerialNumber::parse(serial)?);
        }
        Arc::new(signer)
    } else {
        tracing::warn!(
            "No CA key at {}, CRL signing is unavailable",
            key_path.display()
        );
        Arc::new(UnconfiguredSigner)
    };

    Ok(PkiBackend::new(Arc::new(storage), signer, config))
}

async fn handle_crl_command(
    command: CrlCommands,
    backend: &PkiBackend,
    output: &OutputFormat,
) -> Result<()> {
    match command {
        CrlCommands::Rotate => {
            let crl = backend.rotate_crl().await?;
            output.print_key_value(&[
                ("This update".to_string(), format_time(crl.this_update)),
                ("Next update".to_string(), format_time(crl.next_update)),
                ("Entries".to_string(), crl.entries.len().to_string()),
            ]);
            Ok(())
        }
        CrlCommands::Show => {
            let summary = backend.crl_summary().await?;
            output.print_key_value(&[
                ("Issuer".to_string(), summary.issuer.clone()),
                ("This update".to_string(), format_time(summary.this_update)),
                (
                    "Next update".to_string(),
                    summary
                        .next_update
                        .map(format_time)
                        .unwrap_or_else(|| "-".to_string()),
                ),
                ("Entries".to_string(), summary.entries.len().to_string()),
            ]);
            if !summary.entries.is_empty() {
                println!();
                let mut rows = vec![vec!["SERIAL".to_string(), "REVOKED".to_string()]];
                rows.extend(
                    summary
                        .entries
                        .iter()
                        .map(|e| vec![e.serial.to_string(), format_time(e.revocation_time)]),
                );
                output.print_table(&rows);
            }
            Ok(())
        }
        CrlCommands::Export { format, output: path } => {
            let der = backend.fetch_crl_der().await?;
            let bytes = match format {
                CrlFormat::Der => der,
                CrlFormat::Pem => pem::encode(CRL_LABEL, &der).into_bytes(),
            };
            match path {
                Some(path) => {
                    tokio::fs::write(&path, &bytes).await?;
                    tracing::info!("Wrote CRL to {}", path.display());
                }
                None => io::stdout().write_all(&bytes)?,
            }
            Ok(())
        }
    }
}

async fn handle_cert_command(
    command: CertCommands,
    backend: &PkiBackend,
    output: &OutputFormat,
) -> Result<()> {
    match command {
        CertCommands::Import { path, role } => {
            let pem_data = read_input(&path)?;
            let entry = backend.import_certificate(&pem_data, &role).await?;
            output.print_key_value(&[
                ("Serial".to_string(), entry.serial.to_string()),
                ("Expires".to_string(), format_time(entry.expiration)),
                ("Role".to_string(), entry.role),
            ]);
            Ok(())
        }
        CertCommands::List => {
            let entries = backend.list_certificates().await?;
            output.print_table(&certificate_table(&entries, backend.now()));
            Ok(())
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut data = String::new();
        io::stdin().read_to_string(&mut data)?;
        return Ok(data);
    }
    Ok(std::fs::read_to_string(path)?)
}

fn tidy_params(args: &TidyArgs, backend: &PkiBackend) -> TidyParams {
    let defaults = backend.default_tidy_params();
    TidyParams {
        tidy_cert_store: !args.no_cert_store,
        tidy_revoked_certs: !args.no_revoked,
        safety_buffer: args
            .safety_buffer
            .map(crate::config::seconds)
            .unwrap_or(defaults.safety_buffer),
        pause_duration: std::time::Duration::from_millis(args.pause_ms),
        continue_on_error: !args.fail_fast,
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn revoke_rows(response: &RevokeResponse) -> Vec<(String, String)> {
    let status = match response.status {
        RevocationStatus::Revoked => "revoked",
        RevocationStatus::AlreadyRevoked => "already revoked",
        RevocationStatus::AlreadyExpired => "expired, not revoked",
    };
    let mut rows = vec![
        ("Serial".to_string(), response.serial.to_string()),
        ("Status".to_string(), status.to_string()),
    ];
    if let Some(at) = response.revocation_time {
        rows.push(("Revocation time".to_string(), format_time(at)));
    }
    rows
}

fn tidy_rows(report: &TidyReport) -> Vec<(String, String)> {
    vec![
        (
            "Certificates removed".to_string(),
            report.certs_deleted.to_string(),
        ),
        (
            "Revocations removed".to_string(),
            report.revoked_deleted.to_string(),
        ),
        (
            "CRL rebuilt".to_string(),
            if report.crl_rebuilt { "yes" } else { "no" }.to_string(),
        ),
        ("Errors".to_string(), report.errors.len().to_string()),
    ]
}

fn certificate_table(entries: &[CertificateEntry], now: DateTime<Utc>) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "SERIAL".to_string(),
        "ROLE".to_string(),
        "EXPIRES".to_string(),
        "STATE".to_string(),
    ]];
    for entry in entries {
        rows.push(vec![
            entry.serial.to_string(),
            entry.role.clone(),
            format_time(entry.expiration),
            if entry.is_expired_at(now) { "expired" } else { "valid" }.to_string(),
        ]);
    }
    rows
}

fn revoked_table(records: &[RevocationRecord]) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "SERIAL".to_string(),
        "REVOKED".to_string(),
        "EXPIRES".to_string(),
    ]];
    for record in records {
        rows.push(vec![
            record.serial.to_string(),
            format_time(record.revocation_time),
            format_time(record.certificate_expiration),
        ]);
    }
    rows
}
