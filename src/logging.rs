// 该文件是 Kanjian （看见） 项目的一部分。
// src/logging.rs - 日志初始化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  fs::{File, OpenOptions},
  path::Path,
  sync::Mutex,
};

use anyhow::{Context, Result};
use tracing_subscriber::{
  EnvFilter,
  fmt::writer::{BoxMakeWriter, MakeWriterExt},
};

const DEFAULT_FILTER: &str = "info";

/// 初始化日志：输出到 stderr，指定文件时同时追加写入该文件。
/// 日志级别由 `RUST_LOG` 控制，默认为 info。
pub fn init(log_file: Option<&Path>) -> Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  let file = log_file.map(open_log_file).transpose()?;
  let with_file = file.is_some();
  let writer = match file {
    Some(file) => BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file))),
    None => BoxMakeWriter::new(std::io::stderr),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(!with_file)
    .try_init()
    .map_err(|e| anyhow::anyhow!("无法初始化日志: {}", e))?;

  Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
  OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .with_context(|| format!("无法打开日志文件: {}", path.display()))
}
