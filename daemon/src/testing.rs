//! In-memory fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer};

use crate::directory::{Directories, GroupDirectory, InstanceDetails, InstanceDirectory};
use crate::error::{PluginError, QueueError, UpstreamError};
use crate::message::{ActionKey, Message, MessageKind};
use crate::plugin::{require_kind, ActionPlugin, PluginDescriptor};
use crate::processor::Phase;
use crate::queue::{QueueClient, RawMessage};

/// Autoscaling notification as delivered through SNS to SQS.
pub fn auto_scaling_body(event: &str, instance_id: &str) -> String {
    let inner = serde_json::json!({
        "StatusCode": "InProgress",
        "Service": "AWS Auto Scaling",
        "AutoScalingGroupName": "test2-AutoScalingGroup-1QDX3CNO5SU3D",
        "Description": format!("Terminating EC2 instance: {instance_id}"),
        "Event": event,
        "EC2InstanceId": instance_id,
        "Cause": "At 2015-03-16T19:29:14Z an instance was taken out of service",
    });
    serde_json::json!({
        "Type": "Notification",
        "MessageId": "e4379a5a-e119-53f7-b6ef-d7dbd32d31fe",
        "TopicArn": "arn:aws:sns:us-east-1:123456890:test-ScalingNotificationsTopic",
        "Subject": "Auto Scaling: termination for group \"test2-AutoScalingGroup-1QDX3CNO5SU3D\"",
        "Message": inner.to_string(),
        "Timestamp": "2015-03-16T19:33:08.242Z",
    })
    .to_string()
}

/// Metric alarm notification whose trigger names `group`.
pub fn alarm_body(state: &str, group: &str) -> String {
    let inner = serde_json::json!({
        "AlarmName": "test-etcd0",
        "AlarmDescription": null,
        "NewStateValue": state,
        "OldStateValue": "INSUFFICIENT_DATA",
        "NewStateReason": "Threshold Crossed",
        "Trigger": {
            "MetricName": "CPUCreditBalance",
            "Namespace": "AWS/EC2",
            "Unit": null,
            "Dimensions": [{ "value": group, "name": "AutoScalingGroupName" }],
        },
    });
    serde_json::json!({
        "Type": "Notification",
        "MessageId": "15bcca60-a8f9-536a-871c-9d85c15f6490",
        "Subject": "ALARM: \"test-etcd0\" in US West (Oregon)",
        "Message": inner.to_string(),
    })
    .to_string()
}

/// Scripted queue service.
#[derive(Default)]
pub struct MemoryQueue {
    listing: Vec<String>,
    list_calls: AtomicUsize,
    batches: Mutex<VecDeque<Result<Vec<RawMessage>, QueueError>>>,
    deleted: Mutex<Vec<(String, String)>>,
    attributes: Mutex<Vec<(String, i32, i32)>>,
    attribute_errors: HashMap<String, QueueError>,
    attribute_delay: Option<Duration>,
    fail_deletes: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(listing: Vec<String>) -> Self {
        Self {
            listing,
            ..Self::default()
        }
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn failing_attributes(mut self, url: &str, error: QueueError) -> Self {
        self.attribute_errors.insert(url.to_string(), error);
        self
    }

    pub fn slow_attributes(mut self, delay: Duration) -> Self {
        self.attribute_delay = Some(delay);
        self
    }

    pub fn push_batch(&self, batch: Vec<RawMessage>) {
        self.batches.lock().push_back(Ok(batch));
    }

    pub fn push_error(&self, error: QueueError) {
        self.batches.lock().push_back(Err(error));
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().clone()
    }

    pub fn attributes_set(&self) -> Vec<(String, i32, i32)> {
        self.attributes.lock().clone()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn list_queue_urls(&self) -> Result<Vec<String>, QueueError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.listing.clone())
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        wait_time: i32,
        visibility_timeout: i32,
    ) -> Result<(), QueueError> {
        if let Some(delay) = self.attribute_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.attribute_errors.get(queue_url) {
            return Err(error.clone());
        }
        self.attributes
            .lock()
            .push((queue_url.to_string(), wait_time, visibility_timeout));
        Ok(())
    }

    async fn receive_messages(
        &self,
        _queue_url: &str,
        _wait_time: i32,
        _visibility_timeout: i32,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let next = self.batches.lock().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        if self.fail_deletes {
            return Err(QueueError::Service {
                operation: "DeleteMessage".into(),
                message: "access denied".into(),
            });
        }
        self.deleted
            .lock()
            .push((queue_url.to_string(), receipt_handle.to_string()));
        Ok(())
    }
}

/// Fixed autoscaling group membership.
#[derive(Default)]
pub struct StaticDirectory {
    groups: HashMap<String, Vec<String>>,
    failures_left: AtomicU32,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: &str, instances: &[&str]) -> Self {
        self.groups.insert(
            group.to_string(),
            instances.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Fail the first `n` lookups with a transient error.
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupDirectory for StaticDirectory {
    async fn group_instance_ids(&self, group: &str) -> Result<Vec<String>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(UpstreamError::Service {
                operation: "DescribeAutoScalingGroups".into(),
                message: "Rate exceeded".into(),
            });
        }
        Ok(self.groups.get(group).cloned().unwrap_or_default())
    }
}

/// Fixed EC2 instances, described by id.
#[derive(Default)]
pub struct StaticInstances {
    instances: HashMap<String, InstanceDetails>,
    failures_left: AtomicU32,
    calls: AtomicUsize,
}

impl StaticInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance_id: &str, name: &str, state: &str) -> Self {
        let details = InstanceDetails {
            instance_id: instance_id.to_string(),
            state: Some(state.to_string()),
            tags: [("Name".to_string(), name.to_string())].into(),
            ..InstanceDetails::default()
        };
        self.instances.insert(instance_id.to_string(), details);
        self
    }

    /// Fail the first `n` lookups with a transient error.
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceDirectory for StaticInstances {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceDetails>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(UpstreamError::Transport {
                operation: "DescribeInstances".into(),
                message: "connection reset".into(),
            });
        }
        Ok(self.instances.get(instance_id).cloned())
    }
}

/// Group and instance fakes bundled the way listeners hand them out.
pub fn directories(groups: StaticDirectory, instances: StaticInstances) -> Directories {
    Directories::new(Arc::new(groups), Arc::new(instances))
}

#[derive(Clone, Copy)]
enum Behavior {
    Normal,
    FailAt(Phase),
    Panic,
    HangFor(&'static str),
}

/// Records every plugin call across all plugins it hands out.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn plugin(&self, name: &'static str) -> PluginDescriptor {
        self.descriptor(name, Behavior::Normal, None)
    }

    pub fn failing_plugin(&self, name: &'static str, phase: Phase) -> PluginDescriptor {
        self.descriptor(name, Behavior::FailAt(phase), None)
    }

    pub fn panicking_plugin(&self, name: &'static str) -> PluginDescriptor {
        self.descriptor(name, Behavior::Panic, None)
    }

    /// Never finishes `perform` for messages about `instance_id`.
    pub fn hanging_plugin(&self, name: &'static str, instance_id: &'static str) -> PluginDescriptor {
        self.descriptor(name, Behavior::HangFor(instance_id), None)
    }

    /// Panics while being built for a message.
    pub fn panicking_constructor(&self, name: &'static str) -> PluginDescriptor {
        PluginDescriptor::new(name, move |_message: Arc<Message>, _settings| {
            panic!("{name} constructor exploded")
        })
    }

    pub fn alarm_only_plugin(&self, name: &'static str) -> PluginDescriptor {
        self.descriptor(name, Behavior::Normal, Some(MessageKind::Alarm))
    }

    fn descriptor(
        &self,
        name: &'static str,
        behavior: Behavior,
        kind: Option<MessageKind>,
    ) -> PluginDescriptor {
        let calls = self.calls.clone();
        PluginDescriptor::new(name, move |message: Arc<Message>, _settings| {
            if let Some(kind) = kind {
                require_kind(name, &message, kind)?;
            }
            Ok(Box::new(RecordingPlugin {
                name,
                behavior,
                message,
                calls: calls.clone(),
            }) as Box<dyn ActionPlugin>)
        })
    }
}

struct RecordingPlugin {
    name: &'static str,
    behavior: Behavior,
    message: Arc<Message>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingPlugin {
    fn record(&self, phase: Phase, action: Option<ActionKey>) -> Result<(), PluginError> {
        let entry = match action {
            Some(action) => format!("{}:{}:{}", self.name, phase.as_str(), action),
            None => format!("{}:{}", self.name, phase.as_str()),
        };
        self.calls.lock().push(entry);

        match self.behavior {
            Behavior::FailAt(failing) if failing == phase => Err(PluginError::Failed {
                plugin: self.name.to_string(),
                message: format!("{} exploded", phase.as_str()),
            }),
            Behavior::Panic if phase == Phase::Perform => panic!("{} panicked", self.name),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ActionPlugin for RecordingPlugin {
    fn name(&self) -> &str {
        self.name
    }

    async fn run_before(&self) -> Result<(), PluginError> {
        self.record(Phase::RunBefore, None)
    }

    async fn perform(&self, action: ActionKey) -> Result<(), PluginError> {
        if let Behavior::HangFor(instance_id) = self.behavior {
            if self.message.instance_id() == Some(instance_id) {
                std::future::pending::<()>().await;
            }
        }
        self.record(Phase::Perform, Some(action))
    }

    async fn run_after(&self) -> Result<(), PluginError> {
        self.record(Phase::RunAfter, None)
    }
}

/// Subscriber layer that keeps every event's fields as strings.
///
/// The event name lives under `message`.
#[derive(Clone, Default)]
pub struct CapturedEvents {
    events: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl CapturedEvents {
    pub fn named(&self, name: &str) -> Vec<HashMap<String, String>> {
        self.events
            .lock()
            .iter()
            .filter(|fields| fields.get("message").map(String::as_str) == Some(name))
            .cloned()
            .collect()
    }
}

impl<S: tracing::Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        event.record(&mut fields);
        self.events.lock().push(fields.0);
    }
}

#[derive(Default)]
struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}
