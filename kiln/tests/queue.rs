use kiln::{
    vk, BlitCommand, BufferBinding, BufferDesc, BufferId, CommandBuffer, CommandQueue, ComputeCommand,
    ComputeDispatch, ComputePipelineDesc, Device, Error, NativeCommand, NullDevice, QueueConfig,
    RecordedItem, RecordingDevice, RenderCommand, ShaderLibrary, Stage, TextureDesc, TextureId, Viewport,
};
use parking_lot::Mutex;
use rand::{seq::SliceRandom, Rng};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    device: Arc<RecordingDevice>,
    queue: Arc<CommandQueue>,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture::with_config(QueueConfig {
            staging_heap_size: 1 << 20,
            ..QueueConfig::default()
        })
    }

    fn with_config(config: QueueConfig) -> Fixture {
        Fixture::with_device(RecordingDevice::new().unwrap(), config)
    }

    fn with_device(device: RecordingDevice, config: QueueConfig) -> Fixture {
        init_tracing();
        let device = Arc::new(device);
        let queue = Arc::new(CommandQueue::new(device.clone(), config).unwrap());
        Fixture { device, queue }
    }

    fn buffer(&self, size: u64) -> BufferId {
        self.device
            .create_buffer("test buffer", &BufferDesc::device_local(size))
            .unwrap()
    }

    fn texture(&self, width: u32, height: u32) -> TextureId {
        self.device.create_texture(
            "test texture",
            &TextureDesc {
                width,
                height,
                format: vk::Format::R8G8B8A8_UNORM,
            },
        )
    }
}

fn fill(buffer: BufferId, value: u8) -> BlitCommand {
    BlitCommand::FillBuffer {
        buffer,
        offset: 0,
        size: 4,
        value,
    }
}

#[test]
fn event_callbacks_follow_enqueue_order() {
    let fixture = Fixture::with_config(QueueConfig {
        max_pending_commands: 64,
        num_command_buffers: 4,
        staging_heap_size: 1 << 16,
        ..QueueConfig::default()
    });
    let buffer = fixture.buffer(16);
    let fired = Arc::new(Mutex::new(Vec::new()));

    let mut expected = Vec::new();
    for i in 0..300 {
        match i % 4 {
            0 | 3 => {
                let fired = fired.clone();
                fixture.queue.enqueue_native_event(move || fired.lock().push(i));
                expected.push(i);
            }
            1 => fixture.queue.enqueue_native_command(|_| {}),
            _ => fixture.queue.enqueue_blit(fill(buffer, i as u8)),
        }
        if i == 150 {
            fixture.queue.flush();
        }
    }
    fixture.queue.finish();

    assert_eq!(*fired.lock(), expected);
}

#[test]
fn finish_fires_every_earlier_event_once() {
    let fixture = Fixture::new();
    let counters: Arc<Vec<AtomicUsize>> = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect());
    for i in 0..100 {
        let counters = counters.clone();
        fixture.queue.enqueue_native_event(move || {
            counters[i].fetch_add(1, Ordering::SeqCst);
        });
        if i % 10 == 0 {
            fixture.queue.enqueue_native_command(|_| {});
        }
    }
    fixture.queue.finish();
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));

    fixture.queue.finish();
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
}

#[test]
fn native_commands_split_into_windows() {
    let fixture = Fixture::new();
    let executed = Arc::new(AtomicUsize::new(0));
    for _ in 0..513 {
        let executed = executed.clone();
        fixture.queue.enqueue_native_command(move |_| {
            executed.fetch_add(1, Ordering::SeqCst);
        });
    }
    fixture.queue.finish();

    assert_eq!(executed.load(Ordering::SeqCst), 513);
    let trace = fixture.device.trace();
    assert_eq!(trace.len(), 5);
    assert!(trace.iter().all(|cb| cb.enqueued));
    assert!(trace[..4].iter().all(|cb| cb.items.is_empty()));
    assert_eq!(trace[4].signaled_markers().len(), 1);
    assert_eq!(fixture.queue.stats().windows, 5);
    assert_eq!(fixture.queue.stats().command_buffers, 5);
    assert_eq!(fixture.queue.stats().operations, 514);
}

#[test]
fn native_command_batches_keep_order() {
    let fixture = Fixture::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let commands: Vec<NativeCommand> = (0..10)
        .map(|i| {
            let order = order.clone();
            Box::new(move |_: &mut dyn CommandBuffer| order.lock().push(i)) as NativeCommand
        })
        .collect();
    fixture.queue.enqueue_native_commands(commands);
    fixture.queue.finish();
    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}

#[test]
fn zero_size_write_is_a_no_op() {
    let fixture = Fixture::new();
    let buffer = fixture.buffer(16);
    fixture.queue.enqueue_write(buffer, 0, &[], false);
    assert_eq!(fixture.queue.stats().operations, 0);
    assert_eq!(fixture.queue.staging_used(), Some(0));

    fixture.queue.finish();
    assert!(fixture
        .device
        .trace()
        .iter()
        .all(|cb| cb.items.is_empty()));
}

#[test]
fn blocking_write_reaches_the_buffer() {
    let fixture = Fixture::new();
    let buffer = fixture.buffer(64);
    let data: Vec<u8> = (1..=8).collect();
    fixture.queue.enqueue_write(buffer, 8, &data, true);

    assert_eq!(fixture.device.read_buffer(buffer, 8, 8).unwrap(), data);
    assert_eq!(fixture.device.read_buffer(buffer, 0, 8).unwrap(), vec![0; 8]);

    // completion handlers of the first command buffer have run once the next one completes
    fixture.queue.finish();
    assert_eq!(fixture.queue.staging_used(), Some(0));
}

#[test]
fn staging_is_reclaimed_after_completion() {
    let fixture = Fixture::with_config(QueueConfig {
        staging_heap_size: 4096,
        ..QueueConfig::default()
    });
    let buffer = fixture.buffer(4096);
    for i in 0..64u8 {
        let chunk = vec![i; 1024];
        fixture
            .queue
            .enqueue_write(buffer, (i as u64 % 4) * 1024, &chunk, false);
        if i % 2 == 1 {
            fixture.queue.finish();
        }
    }
    fixture.queue.finish();
    assert_eq!(fixture.device.read_buffer(buffer, 3 * 1024, 4).unwrap(), vec![63; 4]);
    assert_eq!(fixture.device.read_buffer(buffer, 2 * 1024, 4).unwrap(), vec![62; 4]);
}

#[test]
fn concurrent_enqueue_loses_nothing() {
    let fixture = Fixture::with_config(QueueConfig {
        max_pending_commands: 128,
        num_command_buffers: 4,
        staging_heap_size: 1 << 16,
        ..QueueConfig::default()
    });
    let executed = Arc::new(AtomicUsize::new(0));
    let fired = Arc::new(Mutex::new(Vec::new()));
    let mut rng = rand::thread_rng();
    let counts: Vec<usize> = (0..8).map(|_| rng.gen_range(50..200)).collect();

    let threads: Vec<_> = counts
        .iter()
        .enumerate()
        .map(|(t, &count)| {
            let queue = fixture.queue.clone();
            let executed = executed.clone();
            let fired = fired.clone();
            thread::spawn(move || {
                let mut kinds: Vec<bool> = (0..count).map(|i| i % 3 == 0).collect();
                kinds.shuffle(&mut rand::thread_rng());
                for (seq, is_event) in kinds.into_iter().enumerate() {
                    if is_event {
                        let fired = fired.clone();
                        queue.enqueue_native_event(move || fired.lock().push((t, seq)));
                    } else {
                        let executed = executed.clone();
                        queue.enqueue_native_command(move |_| {
                            executed.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    fixture.queue.finish();

    let total: usize = counts.iter().sum();
    let events = fired.lock().clone();
    assert_eq!(executed.load(Ordering::SeqCst) + events.len(), total);
    assert_eq!(fixture.queue.stats().operations, total as u64 + 1);
    for t in 0..counts.len() {
        let sequence: Vec<usize> = events.iter().filter(|e| e.0 == t).map(|e| e.1).collect();
        assert!(sequence.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn events_only_log_uses_a_single_command_buffer() {
    let fixture = Fixture::new();
    let fired = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let fired = fired.clone();
        fixture.queue.enqueue_native_event(move || fired.lock().push(i));
    }
    fixture.queue.finish();

    assert_eq!(*fired.lock(), vec![0, 1, 2]);
    let trace = fixture.device.trace();
    assert_eq!(trace.len(), 1);
    assert!(trace[0].items.is_empty());
    assert_eq!(fixture.queue.stats().events, 0);
    assert_eq!(fixture.queue.stats().command_buffers, 1);
}

#[test]
#[should_panic(expected = "staging heap exhausted")]
fn write_larger_than_staging_heap_panics() {
    let fixture = Fixture::with_config(QueueConfig {
        staging_heap_size: 64,
        ..QueueConfig::default()
    });
    let buffer = fixture.buffer(128);
    fixture.queue.enqueue_write(buffer, 0, &[7u8; 128], false);
}

#[test]
fn dedicated_command_buffer_follows_pending_work() {
    let fixture = Fixture::new();
    let buffer = fixture.buffer(4);
    fixture.queue.enqueue_blit(fill(buffer, 1));
    fixture.queue.enqueue_native_command_buffer(move |command_buffer| {
        let mut blit = command_buffer.blit_encoder();
        blit.record(&fill(buffer, 2));
        blit.end_encoding();
    });
    fixture.queue.finish();

    let trace = fixture.device.trace();
    assert_eq!(trace.len(), 3);
    assert_eq!(fixture.queue.stats().command_buffers, 3);
    assert_eq!(trace[0].items, vec![RecordedItem::Blit(vec![fill(buffer, 1)])]);
    assert_eq!(trace[1].items, vec![RecordedItem::Blit(vec![fill(buffer, 2)])]);
    assert_eq!(fixture.device.read_buffer(buffer, 0, 4).unwrap(), vec![2; 4]);
}

#[test]
fn copy_texture_draws_a_full_screen_strip() {
    let fixture = Fixture::new();
    let source = fixture.texture(256, 128);
    let destination = fixture.texture(256, 128);
    fixture
        .queue
        .enqueue_copy_texture(destination, source)
        .unwrap();
    fixture.queue.finish();

    let trace = fixture.device.trace();
    let (pass, commands) = trace[0].render_encoders().next().unwrap();
    assert_eq!(pass.color_attachments[0].texture, destination);
    assert_eq!(pass.color_attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
    assert!(commands.contains(&RenderCommand::SetViewport(Viewport::new(256.0, 128.0))));
    assert!(commands.contains(&RenderCommand::SetTexture {
        stage: Stage::Fragment,
        index: 0,
        texture: Some(source)
    }));
    assert!(commands.contains(&RenderCommand::SetSampler {
        stage: Stage::Fragment,
        index: 0,
        sampler: None
    }));
    assert_eq!(
        commands.last(),
        Some(&RenderCommand::Draw {
            topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
            vertex_start: 0,
            vertex_count: 4
        })
    );
}

#[test]
fn copy_texture_without_blit_functions_fails_at_enqueue() {
    let fixture = Fixture::with_device(
        RecordingDevice::new().unwrap().with_library(ShaderLibrary::new()),
        QueueConfig {
            staging_heap_size: 1 << 16,
            ..QueueConfig::default()
        },
    );
    let source = fixture.texture(16, 16);
    let destination = fixture.texture(16, 16);
    let result = fixture.queue.enqueue_copy_texture(destination, source);
    assert!(matches!(result, Err(Error::ProgramCreation(_))));
    assert_eq!(fixture.queue.stats().operations, 0);
}

#[test]
fn copy_texture_to_unknown_texture_fails() {
    let fixture = Fixture::new();
    let source = fixture.texture(16, 16);
    let destination = fixture.texture(16, 16);
    fixture.device.retire(destination.into());
    let result = fixture.queue.enqueue_copy_texture(destination, source);
    assert!(matches!(result, Err(Error::UnknownResource)));
}

#[test]
fn reserved_markers_share_the_event_timeline() {
    let fixture = Fixture::new();
    let marker = fixture.queue.reserve_marker();
    let event = fixture.queue.shared_event().clone();
    fixture
        .queue
        .enqueue_native_command(move |command_buffer| command_buffer.encode_signal_event(&event, marker));
    fixture.queue.enqueue_native_command(|_| {});
    fixture.queue.finish();

    let trace = fixture.device.trace();
    let markers = trace[0].signaled_markers();
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0], marker);
    assert!(markers[1] > marker);
    assert_eq!(fixture.queue.shared_event().signaled_value(), markers[1]);
}

#[test]
fn compute_dispatches_use_thread_grids() {
    let fixture = Fixture::new();
    fixture.device.library().add("reduce");
    let pipeline = fixture
        .device
        .create_compute_pipeline(
            "reduce",
            &ComputePipelineDesc {
                function: "reduce".into(),
            },
        )
        .unwrap();
    let buffer = fixture.buffer(256);
    fixture.queue.enqueue_compute(ComputeDispatch {
        pipeline,
        buffers: vec![Some(BufferBinding::new(buffer, 16)), None],
        textures: vec![],
        grid: [100, 1, 1],
        threads_per_group: [32, 1, 1],
    });
    fixture.queue.finish();

    let trace = fixture.device.trace();
    assert_eq!(
        trace[0].items[0],
        RecordedItem::Compute(vec![
            ComputeCommand::SetPipeline(pipeline),
            ComputeCommand::SetBuffer {
                index: 0,
                buffer: Some(buffer),
                offset: 16
            },
            ComputeCommand::SetBuffer {
                index: 1,
                buffer: None,
                offset: 0
            },
            ComputeCommand::DispatchThreads {
                threads: [100, 1, 1],
                threads_per_group: [32, 1, 1]
            },
        ])
    );
}

#[test]
fn dropping_the_queue_submits_pending_work() {
    let fixture = Fixture::new();
    let buffer = fixture.buffer(4);
    fixture.queue.enqueue_blit(fill(buffer, 7));
    let Fixture { device, queue } = fixture;
    drop(queue);

    let deadline = Instant::now() + Duration::from_secs(5);
    while device.trace().is_empty() {
        assert!(Instant::now() < deadline, "pending work was never submitted");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(device.read_buffer(buffer, 0, 4).unwrap(), vec![7; 4]);
}

#[test]
fn null_device_stages_through_dedicated_buffers() {
    init_tracing();
    let device = Arc::new(NullDevice::new());
    let queue = CommandQueue::new(device.clone(), QueueConfig::default()).unwrap();
    assert_eq!(queue.staging_used(), None);

    let target = device
        .create_buffer("target", &BufferDesc::device_local(64))
        .unwrap();
    let live = device.resources().len();
    queue.enqueue_write(target, 0, &[1, 2, 3, 4], true);
    queue.finish();
    assert_eq!(device.resources().len(), live);
}
