//! dlc-cli: Command Line Interface for DLCFlow
//!
//! This is a simple CLI binary that walks one override through the
//! in-memory tracker and the mock head-end. For the full service demo,
//! see the main binary in the root.

use chrono::{Duration, Utc};
use dlc_adapters::MockPolicyProvider;
use dlc_core::{HeaderPatch, InMemoryTrackerStore, NewRequest, PolicyProvider, TrackerStore};
use dlc_domain::{Stage, SwitchDirection};

#[tokio::main]
async fn main() {
    println!("🚀 DLCFlow CLI");
    println!("==============");

    let tracker = InMemoryTrackerStore::new();
    let provider = MockPolicyProvider::new();

    let now = Utc::now();
    let start = now + Duration::minutes(5);
    let end = start + Duration::minutes(30);

    let correlation_id = "cli-demo-override";
    tracker.create_header(NewRequest { correlation_id: correlation_id.into(),
                                       subscription_id: "cli-subscription".into(),
                                       site: "NMI0000001".into(),
                                       meter_serial: "LG000001".into(),
                                       override_value: SwitchDirection::On,
                                       group_id: None,
                                       request_start: Some(start),
                                       request_end: Some(end) },
                          now)
           .expect("create header");

    tracker.update_tracker(correlation_id, Stage::Queued, now, None, HeaderPatch::default())
           .expect("queue");

    // Create + deploy against the mock head-end.
    let (policy_name, reply) = provider.create_override_policy(&["LG000001".into()], false, start, 30, false)
                                       .await
                                       .expect("create policy");
    let policy_id = reply.policy_id.expect("policy id");
    tracker.update_tracker(correlation_id,
                           Stage::PolicyCreated,
                           Utc::now(),
                           Some(&reply.message),
                           HeaderPatch::policy(policy_id, &policy_name))
           .expect("policy created");

    let deploy_reply = provider.deploy_policy(policy_id).await.expect("deploy policy");
    tracker.update_tracker(correlation_id,
                           Stage::PolicyDeployed,
                           Utc::now(),
                           Some(&deploy_reply.message),
                           HeaderPatch::default())
           .expect("policy deployed");

    match tracker.stage_records(correlation_id) {
        Ok(stages) => {
            println!("✅ Override tracked through {} stages:", stages.len());
            for stage in stages {
                println!("   #{} {}", stage.stage_number, stage.stage_name);
            }
        }
        Err(e) => println!("❌ Error reading stages: {e:?}"),
    }
    println!("   Policy: {policy_name} ({policy_id})");
}
