//! End-to-end batch handling through the public API with an in-memory queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use lifeguard::config::ListenerConfig;
use lifeguard::{
    Config, Directories, GroupDirectory, InstanceDetails, InstanceDirectory, Listener,
    PluginRegistry, QueueClient, QueueError, RawMessage, UpstreamError,
};

const QUEUE_URL: &str = "https://sqs.us-west-2.amazonaws.com/123456890/test2-ScalingNotificationsQueue";

#[derive(Default)]
struct FakeQueue {
    inbox: Mutex<VecDeque<Vec<RawMessage>>>,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl QueueClient for FakeQueue {
    async fn list_queue_urls(&self) -> Result<Vec<String>, QueueError> {
        Ok(vec![QUEUE_URL.to_string()])
    }

    async fn set_queue_attributes(&self, _: &str, _: i32, _: i32) -> Result<(), QueueError> {
        Ok(())
    }

    async fn receive_messages(&self, _: &str, _: i32, _: i32) -> Result<Vec<RawMessage>, QueueError> {
        Ok(self.inbox.lock().pop_front().unwrap_or_default())
    }

    async fn delete_message(&self, _: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted.lock().push(receipt_handle.to_string());
        Ok(())
    }
}

struct FakeDirectory(HashMap<String, Vec<String>>);

#[async_trait]
impl GroupDirectory for FakeDirectory {
    async fn group_instance_ids(&self, group: &str) -> Result<Vec<String>, UpstreamError> {
        Ok(self.0.get(group).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeInstances {
    described: Mutex<Vec<String>>,
}

#[async_trait]
impl InstanceDirectory for FakeInstances {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceDetails>, UpstreamError> {
        self.described.lock().push(instance_id.to_string());
        Ok(Some(InstanceDetails {
            instance_id: instance_id.to_string(),
            state: Some("running".to_string()),
            tags: [("Name".to_string(), format!("host-{instance_id}"))].into(),
            ..InstanceDetails::default()
        }))
    }
}

fn config(dry_run: bool) -> Config {
    Config::from_json(&format!(
        r#"{{
            "dry_run": {dry_run},
            "listeners": {{
                "staging": {{
                    "credentials": "default",
                    "region": "us-west-2",
                    "queues": ["/scalingnotifications/i"]
                }}
            }},
            "actions": {{
                "launch": ["dummy"],
                "terminate": ["dummy"],
                "test": ["dummy"]
            }}
        }}"#
    ))
    .unwrap()
}

fn autoscaling(event: &str, instance_id: &str, receipt: &str) -> RawMessage {
    let inner = serde_json::json!({
        "Event": event,
        "EC2InstanceId": instance_id,
        "AutoScalingGroupName": "test2-AutoScalingGroup",
    });
    let body = serde_json::json!({
        "Type": "Notification",
        "MessageId": format!("msg-{receipt}"),
        "Subject": "Auto Scaling: launch for group \"test2-AutoScalingGroup\"",
        "Message": inner.to_string(),
    });
    RawMessage::new(body.to_string(), receipt)
}

fn alarm(state: &str, group: &str, receipt: &str) -> RawMessage {
    let inner = serde_json::json!({
        "AlarmName": "etcd-cpu",
        "NewStateValue": state,
        "Trigger": {
            "Dimensions": [{ "name": "AutoScalingGroupName", "value": group }],
        },
    });
    let body = serde_json::json!({
        "Type": "Notification",
        "Subject": format!("{state}: \"etcd-cpu\" in US West (Oregon)"),
        "Message": inner.to_string(),
    });
    RawMessage::new(body.to_string(), receipt)
}

async fn start(config: &Config, queue: Arc<FakeQueue>, instances: Arc<FakeInstances>) -> Listener {
    let actions = PluginRegistry::builtin().resolve(config).unwrap();
    let directory = FakeDirectory(HashMap::from([(
        "etcd".to_string(),
        vec!["i-0abc".to_string()],
    )]));
    let listener_config: &ListenerConfig = &config.listeners["staging"];

    let listener = Listener::new(
        "staging",
        listener_config,
        Arc::new(config.settings.clone()),
        queue,
        Directories::new(Arc::new(directory), instances),
        Arc::new(actions),
    )
    .await
    .unwrap();
    listener.configure_queues().await.unwrap();
    listener
}

#[tokio::test]
async fn test_mixed_batch_is_counted_and_finalized() {
    let config = config(false);
    let queue = Arc::new(FakeQueue::default());
    queue.inbox.lock().push_back(vec![
        autoscaling("autoscaling:EC2_INSTANCE_LAUNCH", "i-1", "launch"),
        autoscaling("autoscaling:EC2_INSTANCE_REBOOT", "i-2", "ignored"),
        alarm("ALARM", "etcd", "alarm"),
        RawMessage::new(r#"{"Subject":"Welcome","Message":"{}"}"#, "poison"),
    ]);

    let instances = Arc::new(FakeInstances::default());
    let listener = start(&config, queue.clone(), instances.clone()).await;
    assert_eq!(listener.queues().len(), 1);

    let report = listener.poll_once(&listener.queues()[0]).await.unwrap();
    assert_eq!(report.received, 4);
    assert_eq!(report.timed_out, 0);

    let counters = listener.counters();
    assert_eq!(counters.messages, 4);
    assert_eq!(counters.successes, 2);
    assert_eq!(counters.failures, 2);

    // the ignored event is failed and save_failures keeps it on the queue
    let mut deleted = queue.deleted.lock().clone();
    deleted.sort();
    assert_eq!(deleted, vec!["alarm", "launch", "poison"]);

    // the dummy plugin looks up each handled instance once
    let mut described = instances.described.lock().clone();
    described.sort();
    assert_eq!(described, vec!["i-0abc", "i-1"]);
}

#[tokio::test]
async fn test_dry_run_never_deletes() {
    let config = config(true);
    let queue = Arc::new(FakeQueue::default());
    queue.inbox.lock().push_back(vec![
        autoscaling("autoscaling:TEST_NOTIFICATION", "i-1", "test"),
        alarm("ALARM", "etcd", "alarm"),
    ]);

    let listener = start(&config, queue.clone(), Arc::new(FakeInstances::default())).await;
    listener.poll_once(&listener.queues()[0]).await.unwrap();

    assert_eq!(listener.counters().successes, 2);
    assert!(queue.deleted.lock().is_empty());
}
