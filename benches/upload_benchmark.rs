//! Upload benchmarks

use async_trait::async_trait;
use bytes::Bytes;
use chunked_uploadr::client::{
    ChunkAck, ClientError, FinalizedFile, InitRequest, TransferClient, UploadSession,
};
use chunked_uploadr::config::UploadConfig;
use chunked_uploadr::upload::{plan, Scheduler, TaskId, TaskStatus, UploadFile, UploadManager, Validator};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

/// Accepts everything immediately
struct InstantClient;

#[async_trait]
impl TransferClient for InstantClient {
    async fn init(&self, _request: &InitRequest) -> Result<UploadSession, ClientError> {
        Ok(UploadSession {
            session_id: "bench".into(),
            upload_endpoint: "/chunk".into(),
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        index: u64,
        body: Bytes,
    ) -> Result<ChunkAck, ClientError> {
        black_box(body);
        Ok(ChunkAck {
            session_id: session.session_id.clone(),
            index,
        })
    }

    async fn finalize(&self, session_id: &str) -> Result<FinalizedFile, ClientError> {
        Ok(FinalizedFile {
            id: session_id.to_string(),
            name: None,
            size: None,
            checksum: None,
            url: None,
        })
    }
}

fn benchmark_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    let chunk_size = 5 * 1024 * 1024;

    for size in [0u64, 12 * 1024 * 1024, 5 * 1024 * 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| plan(black_box(size), black_box(chunk_size)));
        });
    }

    group.finish();
}

fn benchmark_validate(c: &mut Criterion) {
    let allowed: Vec<String> = [".jpg", ".png", "video/*", "application/pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let validator = Validator::new(5 * 1024 * 1024 * 1024, &allowed);
    let file = UploadFile::from_bytes("holiday.mp4", vec![0u8; 16]);

    c.bench_function("validate", |b| {
        b.iter(|| validator.validate(black_box(&file)))
    });
}

fn benchmark_admit_next(c: &mut Criterion) {
    let scheduler = Scheduler::new(3);
    let tasks: Vec<(TaskId, TaskStatus)> = (0..1000)
        .map(|i| {
            let status = if i < 2 {
                TaskStatus::Uploading
            } else {
                TaskStatus::Pending
            };
            (TaskId::new(), status)
        })
        .collect();

    c.bench_function("admit_next_1000_tasks", |b| {
        b.iter(|| scheduler.admit_next(black_box(&tasks).iter().copied()))
    });
}

fn benchmark_manager_throughput(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("manager");
    let size = 1024 * 1024;

    for chunk_size in [16 * 1024u64, 256 * 1024] {
        group.throughput(Throughput::Bytes(size as u64 * 4));
        group.bench_with_input(
            BenchmarkId::new("four_files", chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                let config = UploadConfig {
                    chunk_size,
                    max_concurrent_uploads: 2,
                    ..Default::default()
                };
                let data = Bytes::from(vec![0u8; size]);

                b.to_async(&runtime).iter(|| {
                    let config = config.clone();
                    let data = data.clone();
                    async move {
                        let manager = UploadManager::new(&config, Arc::new(InstantClient)).unwrap();
                        manager.add_files(
                            (0..4).map(|i| UploadFile::from_bytes(format!("f{}.bin", i), data.clone())),
                        );
                        manager.settled().await;
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_plan,
    benchmark_validate,
    benchmark_admit_next,
    benchmark_manager_throughput
);
criterion_main!(benches);
