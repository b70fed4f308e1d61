//! Command line parsing and the download command against a local server

use crate::support::server::{collection_route, Reply, TestServer};
use clap::Parser;
use mix_downloader::cli::{Cli, CliError, Commands};
use mix_downloader::downloader::DownloadError;
use mix_downloader::identifier::GroupRef;
use mix_downloader::output::read_manifest;
use mix_downloader::shutdown::ShutdownCoordinator;
use std::time::Duration;
use tempfile::TempDir;

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["mix-downloader"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn test_repeated_group_flag() {
    let cli = parse(&["download", "--group", "mix:a", "--group", "album:2"]);

    match cli.command {
        Commands::Download(args) => assert_eq!(
            args.groups,
            vec![
                GroupRef::parse("mix:a").unwrap(),
                GroupRef::parse("album:2").unwrap()
            ]
        ),
        _ => panic!("expected download command"),
    }
}

#[test]
fn test_group_is_required() {
    assert!(Cli::try_parse_from(["mix-downloader", "download"]).is_err());
}

#[test]
fn test_budget_flags_map_onto_config() {
    let cli = parse(&[
        "--budget-cap",
        "5",
        "--budget-interval-secs",
        "10",
        "--budget-spacing-ms",
        "0",
        "--concurrency",
        "8",
        "download",
        "--group",
        "mix:a",
    ]);
    let config = cli.download_config().unwrap();

    let budget = config.download_budget.unwrap();
    assert_eq!(budget.cap, 5);
    assert_eq!(budget.interval, Duration::from_secs(10));
    assert_eq!(budget.spacing, Duration::ZERO);
    assert_eq!(config.concurrency, 8);
}

#[test]
fn test_concurrency_bounds() {
    assert!(Cli::try_parse_from(["mix-downloader", "--concurrency", "0", "download", "--group", "mix:a"]).is_err());
    assert!(Cli::try_parse_from(["mix-downloader", "--concurrency", "64", "download", "--group", "mix:a"]).is_err());
}

#[test]
fn test_zero_budget_cap_is_a_configuration_error() {
    let cli = parse(&["--budget-cap", "0", "download", "--group", "mix:a"]);
    assert!(matches!(
        cli.download_config(),
        Err(CliError::ConfigurationError(_))
    ));
}

#[test]
fn test_validate_subcommands_parse() {
    let cli = parse(&["validate", "group", "playlist:abc"]);
    assert!(matches!(cli.command, Commands::Validate(_)));

    let cli = parse(&["validate", "manifest", "data/mix/a/manifest.json"]);
    assert!(matches!(cli.command, Commands::Validate(_)));
}

fn download_cli(server: &TestServer, data_dir: &TempDir, groups: &[&str]) -> Cli {
    let data_dir = data_dir.path().to_string_lossy().to_string();
    let base_url = server.base_url();
    let mut args = vec![
        "--api-base-url",
        base_url.as_str(),
        "--token",
        "t0ken",
        "--data-dir",
        data_dir.as_str(),
        "--jitter-min-ms",
        "0",
        "--jitter-max-ms",
        "0",
        "--budget-spacing-ms",
        "0",
        "--page-size",
        "4",
        "--output-format",
        "json",
        "download",
    ];
    for group in groups {
        args.push("--group");
        args.push(group);
    }
    parse(&args)
}

#[tokio::test]
async fn test_download_command_end_to_end() {
    let server = TestServer::start(collection_route(9)).await;
    let temp = TempDir::new().unwrap();
    let cli = download_cli(&server, &temp, &["mix:abc"]);

    let Commands::Download(args) = &cli.command else {
        panic!("expected download command");
    };
    args.execute(&cli, ShutdownCoordinator::shared()).await.unwrap();

    let dir = temp.path().join("mix/abc");
    assert_eq!(read_manifest(&dir.join("manifest.json")).unwrap().len(), 9);
    assert_eq!(
        std::fs::read(dir.join("008-8.flac")).unwrap(),
        b"audio-8".to_vec()
    );
}

#[tokio::test]
async fn test_download_command_stops_on_expired_token() {
    let server = TestServer::start(|_: &str| Reply::status(401, "expired")).await;
    let temp = TempDir::new().unwrap();
    let cli = download_cli(&server, &temp, &["mix:a", "album:b"]);

    let Commands::Download(args) = &cli.command else {
        panic!("expected download command");
    };
    let result = args.execute(&cli, ShutdownCoordinator::shared()).await;

    assert!(matches!(
        result,
        Err(CliError::DownloadError(DownloadError::AuthorizationExpired))
    ));
    // The second group was never requested
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_failed_groups_are_counted() {
    let server = TestServer::start(|_: &str| Reply::status(404, "no such group")).await;
    let temp = TempDir::new().unwrap();
    let cli = download_cli(&server, &temp, &["mix:a", "album:b"]);

    let Commands::Download(args) = &cli.command else {
        panic!("expected download command");
    };
    let result = args.execute(&cli, ShutdownCoordinator::shared()).await;

    assert!(matches!(
        result,
        Err(CliError::GroupsFailed { failed: 2, total: 2 })
    ));
    // A missing group does not stop the run
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_download_command_requires_api_settings() {
    let cli = parse(&["--token", "t", "download", "--group", "mix:a"]);
    if cli.api_base_url.is_some() {
        // Provided through the environment; nothing to check
        return;
    }

    let Commands::Download(args) = &cli.command else {
        panic!("expected download command");
    };
    let result = args.execute(&cli, ShutdownCoordinator::shared()).await;
    assert!(matches!(result, Err(CliError::ConfigurationError(_))));
}
