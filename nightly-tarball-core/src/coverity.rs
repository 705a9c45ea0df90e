//! Best-effort Coverity scan submission for a freshly built tarball.
//!
//! The orchestrator calls this after artifact discovery for branches with
//! the coverity flag set; any failure here is logged and never fails the
//! branch. The scan tool tarball is cached on disk and reused for 24 hours
//! because it is multiple gigabytes; the download goes through an external
//! `wget` for the same reason.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::debug;

use crate::config::CoverityConfig;
use crate::runner::{logged_call, CallOptions};

const COV_TOOL_FILENAME: &str = "coverity_tools.tgz";
const TOOL_MAX_AGE_SECS: u64 = 24 * 3600;

#[derive(Debug, thiserror::Error)]
pub enum CoverityError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Runner(#[from] crate::runner::RunnerError),
    #[error("cannot locate cov tool bin directory under {0}")]
    ToolNotFound(PathBuf),
    #[error("tarball name {0:?} does not match project prefix")]
    BadTarballName(String),
    #[error("scan submission failed: {0}")]
    Submit(String),
}

fn tool_is_fresh(tool_tarball: &Path) -> bool {
    let Ok(meta) = fs::metadata(tool_tarball) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(age) => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            age.as_secs() + TOOL_MAX_AGE_SECS > now.as_secs()
        }
        Err(_) => false,
    }
}

fn ensure_tool(
    config: &CoverityConfig,
    token: &str,
    build_root: &Path,
) -> Result<PathBuf, CoverityError> {
    fs::create_dir_all(&config.tool_dir)?;
    let tool_tarball = config.tool_dir.join(COV_TOOL_FILENAME);
    if tool_is_fresh(&tool_tarball) {
        debug!("reusing existing tool tarball");
    } else {
        debug!(url = %config.tool_url, "downloading scan tool");
        let cmd = vec![
            "wget".to_string(),
            config.tool_url.clone(),
            "--post-data".to_string(),
            format!("token={token}&project={}", config.project_name),
            "-O".to_string(),
            COV_TOOL_FILENAME.to_string(),
        ];
        let opts = CallOptions {
            log_file: Some(build_root.join("coverity-tools-download-output.txt")),
            ..Default::default()
        };
        logged_call(&cmd, &config.tool_dir, opts)?;
    }
    Ok(tool_tarball)
}

/// Run the scan build against `source_tarball` and submit the results.
pub async fn run_coverity(
    build_root: &Path,
    source_tarball: &Path,
    config: &CoverityConfig,
) -> Result<(), CoverityError> {
    let token = fs::read_to_string(&config.token_file)?
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();

    let tool_tarball = ensure_tool(config, &token, build_root)?;

    fs::create_dir_all(build_root)?;
    debug!(tool = %tool_tarball.display(), "expanding scan tool");
    logged_call(
        &["tar".to_string(), "xf".to_string(), tool_tarball.display().to_string()],
        build_root,
        CallOptions {
            log_file: Some(build_root.join("coverity-tools-untar-output.txt")),
            ..Default::default()
        },
    )?;

    // The tool's top-level directory name changes with every release, so
    // search for it.
    let mut cov_bin = None;
    for entry in fs::read_dir(build_root)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("cov-") {
            cov_bin = Some(entry.path().join("bin"));
            break;
        }
    }
    let cov_bin = cov_bin.ok_or_else(|| CoverityError::ToolNotFound(build_root.to_path_buf()))?;
    debug!(path = %cov_bin.display(), "found scan tool path");

    let mut env: std::collections::HashMap<String, String> = std::env::vars().collect();
    let path = env.get("PATH").cloned().unwrap_or_default();
    env.insert("PATH".to_string(), format!("{}:{path}", cov_bin.display()));

    debug!(tarball = %source_tarball.display(), "extracting build tarball");
    logged_call(
        &[
            "tar".to_string(),
            "xf".to_string(),
            source_tarball.display().to_string(),
        ],
        build_root,
        CallOptions {
            log_file: Some(build_root.join("coverity-source-untar-output.txt")),
            ..Default::default()
        },
    )?;

    // Derive the unpacked directory name from the tarball name.
    let tarball_name = source_tarball
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pattern = format!("^{}-(.*)\\.tar\\..*$", regex::escape(&config.project_prefix));
    let build_version = Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(&tarball_name).map(|c| c[1].to_string()))
        .ok_or_else(|| CoverityError::BadTarballName(tarball_name.clone()))?;
    let srcdir = build_root.join(format!("{}-{}", config.project_prefix, build_version));

    debug!("scan configure");
    let mut configure = vec!["./configure".to_string()];
    configure.extend(config.configure_args.iter().cloned());
    logged_call(
        &configure,
        &srcdir,
        CallOptions {
            env: Some(env.clone()),
            log_file: Some(build_root.join("coverity-configure-output.txt")),
            ..Default::default()
        },
    )?;

    debug!("scan build");
    let mut cov_build = vec![
        "cov-build".to_string(),
        "--dir".to_string(),
        "cov-int".to_string(),
        "make".to_string(),
    ];
    cov_build.extend(config.make_args.iter().cloned());
    logged_call(
        &cov_build,
        &srcdir,
        CallOptions {
            env: Some(env),
            log_file: Some(build_root.join("coverity-make-output.txt")),
            ..Default::default()
        },
    )?;

    debug!("bundling results");
    let results_tarball = build_root.join("analyzed.tar.bz2");
    logged_call(
        &[
            "tar".to_string(),
            "jcf".to_string(),
            results_tarball.display().to_string(),
            "cov-int".to_string(),
        ],
        &srcdir,
        CallOptions {
            log_file: Some(build_root.join("coverity-results-tar-output.txt")),
            ..Default::default()
        },
    )?;

    debug!("submitting results");
    let file_part = reqwest::multipart::Part::bytes(fs::read(&results_tarball)?)
        .file_name("analyzed.tar.bz2");
    let form = reqwest::multipart::Form::new()
        .part("file", file_part)
        .text("email", config.email.clone())
        .text("version", build_version)
        .text("description", "nightly-master".to_string())
        .text("token", token);
    let url = format!(
        "https://scan.coverity.com/builds?project={}",
        config.project_name
    );
    let response = reqwest::Client::new()
        .post(&url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| CoverityError::Submit(e.to_string()))?;
    response
        .error_for_status()
        .map_err(|e| CoverityError::Submit(e.to_string()))?;
    Ok(())
}
