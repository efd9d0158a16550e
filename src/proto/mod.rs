//! Protobuf compilation via the external `protoc` toolchain.
//!
//! Two artifacts are produced from a `.proto` source: a descriptor set
//! (for decoding binary messages during ingestion) and a
//! BigQuery-style schema JSON (via the `bq-schema` protoc plugin, for
//! registration). Both go through a scratch directory and a `protoc`
//! subprocess. The binary being absent is tolerated at startup; the
//! operations that need it fail individually.

use crate::error::{Result, ServiceError};
use prost_reflect::DescriptorPool;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{info, warn};

static MESSAGE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bmessage\s+([A-Za-z_][A-Za-z0-9_]*)\s*\{").expect("valid regex")
});

/// Name of the first `message` declaration in a proto source; this is
/// the message ingestion decodes against.
pub fn top_level_message(proto_source: &str) -> Result<String> {
    MESSAGE_DECL
        .captures(proto_source)
        .map(|cap| cap[1].to_string())
        .ok_or_else(|| {
            ServiceError::ProtobufDecoding(
                "No message definition found in proto source".to_string(),
            )
        })
}

/// Source of compiled protobuf artifacts.
///
/// The production implementation shells out to `protoc`; anything that
/// can produce a descriptor pool and a schema JSON for a proto source
/// satisfies the same contract.
#[async_trait::async_trait]
pub trait ProtoCompiler: Send + Sync {
    /// Compile a proto source into a descriptor pool for dynamic
    /// message decoding.
    async fn compile_descriptors(&self, proto_source: &str) -> Result<DescriptorPool>;

    /// Translate a proto source into BigQuery-style schema JSON.
    async fn compile_schema_json(&self, proto_source: &str) -> Result<Value>;
}

/// `protoc`-backed compiler.
pub struct ProtocCompiler {
    protoc_path: String,
}

impl ProtocCompiler {
    pub fn new(protoc_path: impl Into<String>) -> Self {
        Self {
            protoc_path: protoc_path.into(),
        }
    }

    /// Probe the toolchain once at startup. A missing binary is only a
    /// warning; proto-based registration and ingestion will fail when
    /// actually attempted.
    pub async fn check_installation(&self) -> bool {
        match Command::new(&self.protoc_path).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                info!(version, "protoc found");
                true
            }
            Ok(output) => {
                warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "protoc is present but not working"
                );
                false
            }
            Err(e) => {
                warn!(path = self.protoc_path, error = %e, "protoc binary not found");
                false
            }
        }
    }

    async fn run_protoc(
        &self,
        scratch: &Path,
        args: &[String],
    ) -> std::result::Result<(), String> {
        let output = Command::new(&self.protoc_path)
            .arg(format!("--proto_path={}", scratch.display()))
            .args(args)
            .arg(scratch.join("schema.proto"))
            .output()
            .await
            .map_err(|e| format!("failed to invoke protoc: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if !stderr.is_empty() { stderr } else { stdout };
            return Err(if detail.is_empty() {
                "Unknown protoc error".to_string()
            } else {
                detail
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProtoCompiler for ProtocCompiler {
    async fn compile_descriptors(&self, proto_source: &str) -> Result<DescriptorPool> {
        let scratch = tempfile::tempdir()?;
        tokio::fs::write(scratch.path().join("schema.proto"), proto_source).await?;
        let descriptor_path = scratch.path().join("schema.desc");

        self.run_protoc(
            scratch.path(),
            &[
                format!("--descriptor_set_out={}", descriptor_path.display()),
                "--include_imports".to_string(),
            ],
        )
        .await
        .map_err(ServiceError::ProtobufDecoding)?;

        let bytes = tokio::fs::read(&descriptor_path).await?;
        DescriptorPool::decode(bytes.as_slice())
            .map_err(|e| ServiceError::ProtobufDecoding(format!("invalid descriptor set: {e}")))
    }

    async fn compile_schema_json(&self, proto_source: &str) -> Result<Value> {
        let scratch = tempfile::tempdir()?;
        tokio::fs::write(scratch.path().join("schema.proto"), proto_source).await?;
        let out_dir = scratch.path().join("output");
        tokio::fs::create_dir(&out_dir).await?;

        self.run_protoc(
            scratch.path(),
            &[format!("--bq-schema_out={}", out_dir.display())],
        )
        .await
        .map_err(ServiceError::SchemaTranslation)?;

        // The plugin places the .schema file under the proto's package
        // directory, so search the whole output tree.
        let schema_file = find_schema_file(&out_dir)?.ok_or_else(|| {
            ServiceError::SchemaTranslation(
                "No .schema file generated by the bq-schema plugin".to_string(),
            )
        })?;
        let content = tokio::fs::read_to_string(&schema_file).await?;
        serde_json::from_str(&content).map_err(|e| {
            ServiceError::SchemaTranslation(format!("invalid JSON in generated schema: {e}"))
        })
    }
}

fn find_schema_file(dir: &Path) -> Result<Option<std::path::PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(found) = find_schema_file(&path)? {
                return Ok(Some(found));
            }
        } else if path.extension().is_some_and(|ext| ext == "schema") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_declaration_wins() {
        let proto = "
syntax = \"proto3\";

message UserEvent {
    string user_id = 1;
    UserMetadata metadata = 2;
}

message UserMetadata {
    string browser = 1;
}
";
        assert_eq!(top_level_message(proto).unwrap(), "UserEvent");
    }

    #[test]
    fn proto_without_messages_is_rejected() {
        assert!(top_level_message("syntax = \"proto3\";").is_err());
    }
}
