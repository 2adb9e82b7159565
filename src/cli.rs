use anyhow::{bail, Context, Result};
use serde_json::json;

use crate::{
    config::{parse_keywords, Config},
    google::GoogleWorkspaceSource,
    models::SyncRequest,
    sync::run_sync,
};

/// Runs `sync [--project-id ID] [--keywords a,b] [--days N]` in the
/// foreground. Returns `Ok(false)` when the arguments ask for the server.
pub async fn maybe_run_from_cli(args: &[String]) -> Result<bool> {
    if args.len() < 2 || args[1] != "sync" {
        return Ok(false);
    }

    let request = parse_args(&args[2..]).context("Invalid sync arguments")?;
    let config = Config::from_env()?;
    let job = config.resolve_job(&request)?;
    let source = GoogleWorkspaceSource::new(config.http_timeout_seconds)
        .context("Failed to build Google client")?;

    let summary = run_sync(&source, &config, &job).await?;
    let output = json!({
        "ok": true,
        "projectId": job.project_id,
        "database": config.db_path.display().to_string(),
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(true)
}

fn parse_args(args: &[String]) -> Result<SyncRequest> {
    let mut request = SyncRequest::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .with_context(|| format!("Missing value for {flag}"))
        };
        match flag.as_str() {
            "--project-id" => request.project_id = Some(value()?),
            "--project-name" => request.project_name = Some(value()?),
            "--keywords" => request.keywords = Some(parse_keywords(&value()?)),
            "--days" => {
                let raw = value()?;
                let days = raw
                    .parse::<u32>()
                    .with_context(|| format!("--days must be a whole number, got {raw}"))?;
                request.lookback_days = Some(days);
            }
            other => bail!("Unknown argument: {other}"),
        }
    }
    Ok(request)
}
