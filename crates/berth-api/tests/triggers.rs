// Berth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

mod common;

use berth_api::replication::model::{Resource, Trigger, TriggerSettings};
use berth_api::replication::{ReplicationEvent, Task, TriggerType};
use common::{FakeSubmitter, Replication, replication};
use std::time::Duration;

async fn submitted_tasks(rep: &Replication, execution_id: i64) -> Vec<Task> {
    let mut tasks = Vec::new();
    for _ in 0..100 {
        tasks = rep.controller.list_tasks(execution_id).await.unwrap();
        if !tasks.is_empty() && tasks.iter().all(|t| t.job_id.is_some()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tasks
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_policy_fires_until_disabled() {
    let rep = replication(vec![Resource::image("library/hello-world", &["latest"])], FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;
    let mut policy = rep.controller.policies().get(policy_id).await.unwrap();
    policy.trigger = Some(Trigger { trigger_type: TriggerType::Scheduled, settings: Some(TriggerSettings { cron: "*/2 * * * * *".to_string() }) });
    rep.controller.policies().update(policy.clone()).await.unwrap();

    assert!(rep.triggers.sync(&policy).unwrap());
    assert!(rep.triggers.is_scheduled(policy_id));
    tokio::time::sleep(Duration::from_secs(7)).await;

    let fired = rep.controller.list_executions(Some(policy_id)).await.unwrap();
    assert!((3..=4).contains(&fired.len()), "{} executions", fired.len());
    assert!(fired.iter().all(|e| e.trigger == TriggerType::Scheduled));

    policy.enabled = false;
    assert!(!rep.triggers.sync(&policy).unwrap());
    assert!(!rep.triggers.is_scheduled(policy_id));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rep.controller.list_executions(Some(policy_id)).await.unwrap().len(), fired.len());
}

#[tokio::test]
async fn test_start_all_arms_only_scheduled_policies() {
    let rep = replication(vec![], FakeSubmitter::default()).await;
    rep.mirror_policy().await;
    rep.event_policy().await;

    let mut nightly = berth_api::replication::ReplicationPolicy::new("nightly");
    nightly.dest_registry_id = Some(rep.dst_registry_id);
    nightly.trigger = Some(Trigger { trigger_type: TriggerType::Scheduled, settings: Some(TriggerSettings { cron: "0 0 2 * * *".to_string() }) });
    let nightly_id = rep.controller.policies().create(nightly).await.unwrap();

    assert_eq!(rep.triggers.start_all().await.unwrap(), 1);
    assert!(rep.triggers.is_scheduled(nightly_id));

    rep.triggers.unschedule(nightly_id);
    assert!(!rep.triggers.is_scheduled(nightly_id));
}

#[tokio::test]
async fn test_push_event_starts_event_based_policy() {
    let rep = replication(vec![], FakeSubmitter::default()).await;
    let policy_id = rep.event_policy().await;
    let manual_id = rep.mirror_policy().await;

    let started = rep.triggers.on_event(&ReplicationEvent::push(Resource::image("library/hello-world", &["v1"]))).await.unwrap();
    assert_eq!(started.len(), 1);

    let tasks = submitted_tasks(&rep, started[0]).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].src_resource, "library/hello-world:[v1]");
    assert_eq!(tasks[0].dst_resource, "mirror/hello-world:[v1]");
    assert_eq!(*rep.destination.namespaces.lock(), vec!["mirror".to_string()]);

    let execution = rep.controller.get_execution(started[0]).await.unwrap();
    assert_eq!(execution.policy_id, policy_id);
    assert_eq!(execution.trigger, TriggerType::EventBased);
    assert!(rep.controller.list_executions(Some(manual_id)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_events_outside_policy_scope_start_nothing() {
    let rep = replication(vec![], FakeSubmitter::default()).await;
    let policy_id = rep.event_policy().await;

    let elsewhere = ReplicationEvent::push(Resource::image("team/app", &["1"]));
    assert!(rep.triggers.on_event(&elsewhere).await.unwrap().is_empty());

    // Deletions replicate only when the policy asks for it
    let deleted = ReplicationEvent::delete(Resource::image("library/hello-world", &["v1"]));
    assert!(rep.triggers.on_event(&deleted).await.unwrap().is_empty());

    let mut policy = rep.controller.policies().get(policy_id).await.unwrap();
    policy.replicate_deletion = true;
    rep.controller.policies().update(policy).await.unwrap();
    assert_eq!(rep.triggers.on_event(&deleted).await.unwrap().len(), 1);
}
