use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use quarry::config::Config;
use quarry::engine::{
    EngineSet, EngineStatus, ExecutionEngine, ExecutionResult, LocalEngine, PerformanceMetrics,
    SchemaInfo,
};
use quarry::error::Result;
use quarry::jobs::JobView;
use quarry::proto::ProtoCompiler;
use quarry::service::QueryService;
use quarry::validate::ValidationReport;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Proto source matching the stub compiler's descriptors.
///
/// Field numbers start at 2 so no wire key collides with the 0x0A
/// line delimiter of the ingestion framing.
pub const EVENT_PROTO: &str = r#"
syntax = "proto3";

message UserEvent {
    string user_id = 2;
    string event_type = 3;
    int64 clicks = 4;
}
"#;

/// Schema JSON the stub compiler reports for [`EVENT_PROTO`].
pub fn event_schema_json() -> Value {
    json!([
        {"name": "user_id", "type": "STRING", "mode": "NULLABLE"},
        {"name": "event_type", "type": "STRING", "mode": "NULLABLE"},
        {"name": "clicks", "type": "INTEGER", "mode": "NULLABLE"}
    ])
}

fn string_field(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        r#type: Some(Type::String as i32),
        label: Some(Label::Optional as i32),
        ..Default::default()
    }
}

/// Descriptor pool for [`EVENT_PROTO`], built programmatically so the
/// test suite never needs an external toolchain.
pub fn event_descriptor_pool() -> DescriptorPool {
    let file = FileDescriptorProto {
        name: Some("events.proto".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("UserEvent".to_string()),
            field: vec![
                string_field("user_id", 2),
                string_field("event_type", 3),
                FieldDescriptorProto {
                    name: Some("clicks".to_string()),
                    number: Some(4),
                    r#type: Some(Type::Int64 as i32),
                    label: Some(Label::Optional as i32),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }],
        ..Default::default()
    };
    DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
        .expect("valid descriptor set")
}

/// Encode one UserEvent message.
///
/// Keep string values shorter than 10 bytes and `clicks != 10` so the
/// serialized bytes never contain 0x0A, which the ingestion framing
/// treats as a record separator.
pub fn encode_event(user_id: &str, event_type: &str, clicks: i64) -> Vec<u8> {
    let descriptor = event_descriptor_pool()
        .get_message_by_name("UserEvent")
        .expect("UserEvent registered");
    let mut message = DynamicMessage::new(descriptor);
    message.set_field_by_name("user_id", prost_reflect::Value::String(user_id.to_string()));
    message.set_field_by_name(
        "event_type",
        prost_reflect::Value::String(event_type.to_string()),
    );
    message.set_field_by_name("clicks", prost_reflect::Value::I64(clicks));
    message.encode_to_vec()
}

/// Join serialized messages with the 0x0A record separator.
pub fn blob_of(messages: &[Vec<u8>]) -> Vec<u8> {
    messages.join(&b'\n')
}

/// Compiler stub that serves the UserEvent artifacts without invoking
/// any external binary.
pub struct StubCompiler;

#[async_trait::async_trait]
impl ProtoCompiler for StubCompiler {
    async fn compile_descriptors(&self, _proto_source: &str) -> Result<DescriptorPool> {
        Ok(event_descriptor_pool())
    }

    async fn compile_schema_json(&self, _proto_source: &str) -> Result<Value> {
        Ok(event_schema_json())
    }
}

/// Engine whose queries take a fixed amount of wall-clock time; used
/// to exercise slot contention, cancellation, and timeouts.
pub struct SlowEngine {
    pub delay: Duration,
}

#[async_trait::async_trait]
impl ExecutionEngine for SlowEngine {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _sql: &str) -> Result<ExecutionResult> {
        tokio::time::sleep(self.delay).await;
        Ok(ExecutionResult {
            data: vec![],
            rows: 0,
            execution_time: self.delay.as_secs_f64(),
            engine: "slow".to_string(),
            query_plan: String::new(),
            performance_metrics: PerformanceMetrics {
                execution_time: self.delay.as_secs_f64(),
                memory_used_mb: 0.0,
                rows_processed: 0,
                cpu_time: 0.0,
                io_wait: 0.0,
                network_time: 0.0,
            },
        })
    }

    async fn validate(&self, _sql: &str) -> Result<ValidationReport> {
        Ok(ValidationReport::empty_query())
    }

    async fn describe(&self) -> Result<SchemaInfo> {
        Ok(SchemaInfo {
            engine: "slow".to_string(),
            database: String::new(),
            tables: vec![],
        })
    }

    async fn status(&self) -> EngineStatus {
        EngineStatus::Available
    }

    async fn close(&self) {}
}

/// Config for an all-in-memory service with a fast scheduler tick.
pub fn test_config(total_slots: usize) -> Config {
    Config {
        total_slots,
        scheduler_tick: Duration::from_millis(50),
        history_db_path: ":memory:".to_string(),
        registry_db_path: ":memory:".to_string(),
        local_db_path: ":memory:".to_string(),
        ..Default::default()
    }
}

/// Build a service with the local engine plus a [`SlowEngine`], spawn
/// its scheduler loop, and hand back the shutdown sender.
pub async fn start_service(total_slots: usize) -> (QueryService, broadcast::Sender<()>) {
    start_service_with_delay(total_slots, Duration::from_millis(200)).await
}

pub async fn start_service_with_delay(
    total_slots: usize,
    slow_delay: Duration,
) -> (QueryService, broadcast::Sender<()>) {
    let config = test_config(total_slots);

    let mut engines = EngineSet::new();
    let local = LocalEngine::connect(":memory:").await.unwrap();
    local.initialize().await.unwrap();
    engines.register(Arc::new(local));
    engines.register(Arc::new(SlowEngine { delay: slow_delay }));

    let service = QueryService::build(&config, engines, Arc::new(StubCompiler))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler = service.scheduler();
    let shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    (service, shutdown_tx)
}

/// Poll a job until it reaches a terminal state.
///
/// Tolerates the transient moment where a job is visible in neither
/// the active sets nor history during the terminal hand-off.
pub async fn wait_terminal(service: &QueryService, job_id: &str) -> JobView {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(view) = service.get_job(job_id).await
                && view.state.is_terminal()
            {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state in time")
}
