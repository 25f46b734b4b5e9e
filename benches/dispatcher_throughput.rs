//! Dispatcher enqueue/process throughput benchmarks.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use orchestrator::agent_registry::{AgentAddress, AgentRecord, AgentRegistry};
use orchestrator::delivery::NoopDeliveryAdapter;
use orchestrator::dispatcher::Dispatcher;
use orchestrator::domain_types::{
    AgentId, AgentName, AgentStatus, MaxAttempts, ModeName, Priority, Target,
};
use orchestrator::inbox::InboxStore;
use orchestrator::message::{Message, MessageKind};
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn build_registry(agent_count: usize) -> (Arc<AgentRegistry>, Vec<AgentId>) {
    let registry = Arc::new(AgentRegistry::new());
    let mode = ModeName::try_new(format!("{agent_count}-agent")).unwrap();
    let mut ids = Vec::with_capacity(agent_count);
    for i in 0..agent_count {
        let id = AgentId::try_new(format!("Agent-{i}")).unwrap();
        registry.register(AgentRecord {
            id: id.clone(),
            name: AgentName::try_new(format!("Agent-{i}")).unwrap(),
            capabilities: vec![],
            status: AgentStatus::Idle,
            addresses: std::collections::HashMap::from([(
                mode.clone(),
                AgentAddress {
                    input_target: Target::new(0, 0),
                    starter_target: Target::new(0, 1),
                },
            )]),
        });
        ids.push(id);
    }
    registry.set_mode(mode);
    (registry, ids)
}

fn bench_enqueue_and_process(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatcher_throughput");

    for recipient_count in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(recipient_count as u64));
        group.bench_with_input(
            BenchmarkId::new("enqueue_and_drain", recipient_count),
            &recipient_count,
            |b, &recipient_count| {
                b.to_async(&rt).iter(|| async {
                    let dir = TempDir::new().unwrap();
                    let (registry, ids) = build_registry(recipient_count + 1);
                    let sender = ids[0].clone();
                    let recipients = ids[1..].to_vec();

                    let inbox = Arc::new(InboxStore::new(dir.path()));
                    let adapter = Arc::new(NoopDeliveryAdapter);
                    let dispatcher = Arc::new(Dispatcher::new(
                        Arc::clone(&registry),
                        adapter,
                        inbox,
                        MaxAttempts::try_new(3).unwrap(),
                        1,
                        std::time::Duration::from_secs(5),
                    ));

                    let message = Message::new(
                        sender,
                        recipients,
                        Priority::Normal,
                        MessageKind::Direct,
                        "benchmark payload".to_string(),
                    );
                    let id = dispatcher.enqueue(message).await.unwrap();
                    while dispatcher.process_one().await.is_some() {}
                    black_box(id)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue_and_process);
criterion_main!(benches);
