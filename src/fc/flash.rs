//! Building firmware from source and writing it over USB DFU.
//!
//! Both steps shell out: the firmware's own build (`make binary` by default)
//! and `dfu-util`. The session's only part is rebooting the board into its
//! bootloader in between; see [`crate::fc::FlightController::flash`].
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use log::{debug, info};
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{sleep, Instant};

use super::connection::LinkError;
use crate::config::FlashConfig;

/// Prefix of the device lines printed by `dfu-util --list`.
pub const DFU_DEVICE_PREFIX: &str = "Found DFU: ";
/// Alt setting name of the STM32 internal flash.
pub const INTERNAL_FLASH_MARKER: &str = "@Internal Flash  /";

const DFU_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("empty target name")]
    EmptyTargetName,

    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("no build command configured")]
    EmptyBuildCommand,

    #[error("build for target {target} failed: {status}")]
    BuildFailed { target: String, status: String },

    #[error("could not find binary for target {0}")]
    NoBinary(String),

    #[error("timed out while waiting for board in DFU mode")]
    DfuTimeout,

    #[error("could not determine flash parameters from {0:?}")]
    DfuDescriptor(String),

    #[error("dfu-util exited with {0}")]
    DfuFailed(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Clone)]
pub struct FlashOptions {
    pub build_command: Vec<String>,
    pub dfu_util: String,
    pub dfu_timeout: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self::from_config(&FlashConfig::default())
    }
}

impl FlashOptions {
    pub fn from_config(config: &FlashConfig) -> Self {
        Self {
            build_command: config.build_command.clone(),
            dfu_util: config.dfu_util.clone(),
            dfu_timeout: Duration::from_secs(config.dfu_timeout_secs),
        }
    }
}

/// Where to write a firmware image, parsed from a `dfu-util --list` line like
///
/// `[0483:df11] ver=2200, devnum=17, cfg=1, intf=0, path="20-1", alt=0, name="@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg", serial="3276365D3336"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuDevice {
    pub alt: String,
    pub serial: String,
    pub offset: String,
}

static ALT_RE: OnceLock<Regex> = OnceLock::new();
static SERIAL_RE: OnceLock<Regex> = OnceLock::new();
static OFFSET_RE: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, src: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(src).expect("valid DFU descriptor pattern"))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    let found = re.captures(text)?.get(1)?.as_str();
    (!found.is_empty()).then(|| found.to_string())
}

impl DfuDevice {
    pub fn parse(line: &str) -> Result<Self, FlashError> {
        let alt = capture(pattern(&ALT_RE, r"alt=(\d+)"), line);
        let serial = capture(pattern(&SERIAL_RE, r#"serial="(.*?)""#), line);
        let offset = capture(pattern(&OFFSET_RE, r"Internal Flash  /([\dx]*?)/"), line);
        match (alt, serial, offset) {
            (Some(alt), Some(serial), Some(offset)) => Ok(Self { alt, serial, offset }),
            _ => Err(FlashError::DfuDescriptor(line.to_string())),
        }
    }
}

/// Device descriptions from `dfu-util --list` output, prefix stripped.
pub fn parse_dfu_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(DFU_DEVICE_PREFIX))
        .map(str::to_string)
        .collect()
}

pub fn find_internal_flash(devices: &[String]) -> Option<&str> {
    devices
        .iter()
        .map(String::as_str)
        .find(|dev| dev.contains(INTERNAL_FLASH_MARKER))
}

/// Newest `*.bin` in `obj_dir` whose file stem ends with `target`.
pub fn find_binary(obj_dir: &Path, target: &str) -> Result<PathBuf, FlashError> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(obj_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bin") {
            continue;
        }
        let matches = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| stem.ends_with(target))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        let modified = std::fs::metadata(&path)?.modified()?;
        if best.as_ref().map_or(true, |(newest, _)| modified > *newest) {
            best = Some((modified, path));
        }
    }
    best.map(|(_, path)| path)
        .ok_or_else(|| FlashError::NoBinary(target.to_string()))
}

/// Resolve `tool` against `PATH` unless it already names a file.
pub fn locate_tool(tool: &str) -> Result<PathBuf, FlashError> {
    let direct = Path::new(tool);
    if direct.components().count() > 1 {
        return if direct.is_file() {
            Ok(direct.to_path_buf())
        } else {
            Err(FlashError::ToolNotFound(tool.to_string()))
        };
    }
    let path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&path)
        .flat_map(|dir| {
            [
                dir.join(tool),
                dir.join(format!("{}{}", tool, env::consts::EXE_SUFFIX)),
            ]
        })
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| FlashError::ToolNotFound(tool.to_string()))
}

pub struct Flasher {
    opts: FlashOptions,
}

impl Flasher {
    pub fn new(opts: FlashOptions) -> Self {
        Self { opts }
    }

    pub fn locate_dfu_util(&self) -> Result<PathBuf, FlashError> {
        locate_tool(&self.opts.dfu_util)
    }

    /// Run the firmware build for `target` and return the produced image.
    pub async fn build(&self, source_dir: &Path, target: &str) -> Result<PathBuf, FlashError> {
        let (program, args) = self
            .opts
            .build_command
            .split_first()
            .ok_or(FlashError::EmptyBuildCommand)?;
        debug!("Running {:?} in {}", self.opts.build_command, source_dir.display());
        let status = Command::new(program)
            .args(args)
            .env("TARGET", target)
            .current_dir(source_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        if !status.success() {
            return Err(FlashError::BuildFailed {
                target: target.to_string(),
                status: status.to_string(),
            });
        }
        find_binary(&source_dir.join("obj"), target)
    }

    pub async fn list_devices(&self, dfu_util: &Path) -> Result<Vec<String>, FlashError> {
        let output = Command::new(dfu_util)
            .arg("--list")
            .stderr(Stdio::null())
            .output()
            .await?;
        Ok(parse_dfu_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Poll `dfu-util --list` until the board's internal flash shows up.
    pub async fn wait_for_device(&self, dfu_util: &Path) -> Result<DfuDevice, FlashError> {
        let deadline = Instant::now() + self.opts.dfu_timeout;
        loop {
            let devices = self.list_devices(dfu_util).await?;
            if let Some(device) = find_internal_flash(&devices) {
                return DfuDevice::parse(device);
            }
            if Instant::now() >= deadline {
                return Err(FlashError::DfuTimeout);
            }
            sleep(DFU_POLL_INTERVAL).await;
        }
    }

    pub async fn write(&self, dfu_util: &Path, device: &DfuDevice, binary: &Path) -> Result<(), FlashError> {
        info!(
            "dfu-util -a {} -S {} -s {}:leave -D {}",
            device.alt,
            device.serial,
            device.offset,
            binary.display()
        );
        let status = Command::new(dfu_util)
            .arg("-a")
            .arg(&device.alt)
            .arg("-S")
            .arg(&device.serial)
            .arg("-s")
            .arg(format!("{}:leave", device.offset))
            .arg("-D")
            .arg(binary)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        if !status.success() {
            return Err(FlashError::DfuFailed(status.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};

    const LIST: &str = "\
dfu-util 0.9

Copyright 2005-2009 Weston Schmidt, Harald Welte and OpenMoko Inc.
Found DFU: [0483:df11] ver=2200, devnum=17, cfg=1, intf=0, path=\"20-1\", alt=1, name=\"@Option Bytes  /0x1FFFC000/01*016 e\", serial=\"3276365D3336\"
Found DFU: [0483:df11] ver=2200, devnum=17, cfg=1, intf=0, path=\"20-1\", alt=0, name=\"@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg\", serial=\"3276365D3336\"
";

    #[test]
    fn picks_internal_flash_and_parses_it() {
        let devices = parse_dfu_list(LIST);
        assert_eq!(devices.len(), 2);
        let line = find_internal_flash(&devices).unwrap();
        let device = DfuDevice::parse(line).unwrap();
        assert_eq!(
            device,
            DfuDevice {
                alt: "0".to_string(),
                serial: "3276365D3336".to_string(),
                offset: "0x08000000".to_string(),
            }
        );
    }

    #[test]
    fn descriptor_without_serial_is_rejected() {
        let err = DfuDevice::parse("alt=0, name=\"@Internal Flash  /0x08000000/04*016Kg\"").unwrap_err();
        assert!(matches!(err, FlashError::DfuDescriptor(_)));
    }

    #[test]
    fn newest_matching_binary_wins() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("inav_1.9.0_SPRACINGF3EVO.bin");
        let new = dir.path().join("inav_1.9.1_SPRACINGF3EVO.bin");
        let other = dir.path().join("inav_1.9.1_NAZE.bin");
        let hex = dir.path().join("inav_1.9.2_SPRACINGF3EVO.hex");
        for p in [&old, &new, &other, &hex] {
            fs::write(p, b"fw").unwrap();
        }
        let base = SystemTime::now() - Duration::from_secs(60);
        File::options().write(true).open(&old).unwrap().set_modified(base).unwrap();
        File::options()
            .write(true)
            .open(&new)
            .unwrap()
            .set_modified(base + Duration::from_secs(30))
            .unwrap();

        assert_eq!(find_binary(dir.path(), "SPRACINGF3EVO").unwrap(), new);
        assert_eq!(find_binary(dir.path(), "NAZE").unwrap(), other);
        assert!(matches!(
            find_binary(dir.path(), "MATEKF405"),
            Err(FlashError::NoBinary(t)) if t == "MATEKF405"
        ));
    }

    #[tokio::test]
    async fn empty_build_command_is_its_own_error() {
        let flasher = Flasher::new(FlashOptions {
            build_command: Vec::new(),
            ..FlashOptions::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let err = flasher.build(dir.path(), "NAZE").await.unwrap_err();
        assert!(matches!(err, FlashError::EmptyBuildCommand));
    }

    #[test]
    fn missing_tool_is_reported() {
        assert!(matches!(
            locate_tool("definitely-not-a-dfu-util-binary"),
            Err(FlashError::ToolNotFound(_))
        ));
        assert!(matches!(
            locate_tool("/nonexistent/dir/dfu-util"),
            Err(FlashError::ToolNotFound(_))
        ));
    }

    #[test]
    fn explicit_tool_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("dfu-util");
        fs::write(&tool, b"#!/bin/sh\n").unwrap();
        assert_eq!(locate_tool(tool.to_str().unwrap()).unwrap(), tool);
    }
}
