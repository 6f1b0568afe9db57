//! Materialization of flushed logs into command buffers.
use crate::{
    command::{ComputeCommand, ComputeDispatch, NativeCommand, OperationKind},
    device::{CommandBuffer, ComputeEncoder, Device, DeviceCaps},
    event::SharedEvent,
    log::{PendingLog, RenderRecord, SideTables},
    marker::MarkerCounter,
    plan::{plan, Window},
    render::{encode_draw, RenderDrawState},
    staging::Staging,
    stats::StatCounters,
    sync::InFlightLimiter,
};
use std::sync::Arc;
use tracing::{debug, trace, trace_span};

/// Encodes flushed logs. Runs on the submission thread.
pub(crate) struct SubmissionEngine {
    pub(crate) device: Arc<dyn Device>,
    pub(crate) caps: DeviceCaps,
    pub(crate) event: Arc<SharedEvent>,
    pub(crate) markers: Arc<MarkerCounter>,
    pub(crate) staging: Arc<Staging>,
    pub(crate) in_flight: Arc<InFlightLimiter>,
    pub(crate) stats: Arc<StatCounters>,
    pub(crate) window_size: usize,
}

impl SubmissionEngine {
    pub(crate) fn submit(&self, log: PendingLog) {
        if log.is_empty() {
            return;
        }
        let _span = trace_span!("flush", len = log.len()).entered();
        log.check_consistency();
        StatCounters::add(&self.stats.flushes, 1);

        if log.is_events_only() {
            self.submit_events_only(log);
            return;
        }

        let (kinds, mut tables) = log.into_parts();
        let windows = plan(&kinds, self.window_size);
        debug!(
            operations = kinds.len(),
            windows = windows.len(),
            "submitting pending log"
        );
        for window in &windows {
            StatCounters::add(&self.stats.windows, 1);
            self.submit_window(window, &mut tables);
        }
    }

    /// Submits an empty command buffer whose completion runs every callback.
    fn submit_events_only(&self, log: PendingLog) {
        let callbacks = log.into_events();
        trace!(callbacks = callbacks.len(), "events only");
        self.in_flight.acquire();
        let mut command_buffer = self.device.create_command_buffer();
        command_buffer.enqueue();
        let event = self.event.clone();
        let in_flight = self.in_flight.clone();
        command_buffer.add_completed_handler(Box::new(move || {
            in_flight.release();
            // queued behind the callbacks of earlier markers
            event.dispatch(callbacks);
        }));
        // counted before commit, completion may run first
        StatCounters::add(&self.stats.command_buffers, 1);
        command_buffer.commit();
    }

    fn submit_window(&self, window: &Window, tables: &mut SideTables) {
        if window.groups.is_empty() {
            return;
        }
        let _span = trace_span!(
            "submit_window",
            start = window.log_range.start,
            len = window.log_range.len()
        )
        .entered();

        self.in_flight.acquire();
        let mut command_buffer = self.device.create_command_buffer();
        command_buffer.enqueue();
        let mut retired_staging = Vec::new();

        for group in &window.groups {
            trace!(kind = ?group.kind, entries = ?group.entries, "encode_group");
            match group.kind {
                OperationKind::Blit => {
                    let mut encoder = command_buffer.blit_encoder();
                    for record in tables.blits.take(group.entries.clone()) {
                        encoder.record(&record.command);
                        retired_staging.extend(record.staging);
                    }
                    encoder.end_encoding();
                }
                OperationKind::Compute => {
                    let mut encoder = command_buffer.compute_encoder();
                    for dispatch in tables.computes.take(group.entries.clone()) {
                        self.encode_dispatch(&mut *encoder, &dispatch);
                    }
                    encoder.end_encoding();
                }
                OperationKind::Event => {
                    for callback in tables.events.take(group.entries.clone()) {
                        let marker = self.markers.next();
                        self.event.notify(marker, callback);
                        command_buffer.encode_signal_event(&self.event, marker);
                        StatCounters::add(&self.stats.events, 1);
                    }
                }
                OperationKind::Native => {
                    for command in tables.natives.take(group.entries.clone()) {
                        command(&mut *command_buffer);
                    }
                }
                OperationKind::Present => {
                    for drawable in tables.presents.take(group.entries.clone()) {
                        command_buffer.present(drawable);
                    }
                }
                OperationKind::Render => {
                    let records = tables.renders.take(group.entries.clone());
                    self.encode_render_group(&mut *command_buffer, records);
                }
            }
        }

        let staging = self.staging.clone();
        let in_flight = self.in_flight.clone();
        command_buffer.add_completed_handler(Box::new(move || {
            for allocation in &retired_staging {
                staging.release(allocation);
            }
            in_flight.release();
        }));
        trace!(in_flight = self.in_flight.in_flight(), "commit");
        StatCounters::add(&self.stats.command_buffers, 1);
        command_buffer.commit();
    }

    fn encode_dispatch(&self, encoder: &mut dyn ComputeEncoder, dispatch: &ComputeDispatch) {
        encoder.record(ComputeCommand::SetPipeline(dispatch.pipeline));
        for (index, binding) in dispatch.buffers.iter().enumerate() {
            encoder.record(ComputeCommand::SetBuffer {
                index: index as u32,
                buffer: binding.map(|b| b.buffer),
                offset: binding.map_or(0, |b| b.offset),
            });
        }
        for (index, texture) in dispatch.textures.iter().enumerate() {
            encoder.record(ComputeCommand::SetTexture {
                index: index as u32,
                texture: *texture,
            });
        }
        if self.caps.contains(DeviceCaps::DISPATCH_THREADS) {
            encoder.record(ComputeCommand::DispatchThreads {
                threads: dispatch.grid,
                threads_per_group: dispatch.threads_per_group,
            });
        } else {
            encoder.record(ComputeCommand::DispatchThreadgroups {
                groups: threadgroup_count(dispatch.grid, dispatch.threads_per_group),
                threads_per_group: dispatch.threads_per_group,
            });
        }
    }

    /// Encodes a run of render records, opening a new render encoder whenever the pass changes.
    fn encode_render_group(&self, command_buffer: &mut dyn CommandBuffer, records: Vec<RenderRecord>) {
        let _span = trace_span!("encode_render_group", records = records.len()).entered();
        let mut pass = match records.first() {
            Some(record) => record.pass.clone(),
            None => return,
        };
        let mut encoder = command_buffer.render_encoder(&pass);
        let mut encoders = 1;
        let mut previous: Option<Arc<RenderDrawState>> = None;

        for record in records {
            if !Arc::ptr_eq(&record.pass, &pass) {
                encoder.end_encoding();
                pass = record.pass.clone();
                encoder = command_buffer.render_encoder(&pass);
                encoders += 1;
                previous = None;
            }
            if let Some(state) = &record.state {
                encode_draw(&mut *encoder, state, previous.as_deref());
            }
            previous = record.state;
        }
        encoder.end_encoding();
        StatCounters::add(&self.stats.render_encoders, encoders);
    }

    /// Commits a command buffer built by a caller-provided closure.
    pub(crate) fn submit_command_buffer(&self, command: NativeCommand) {
        self.in_flight.acquire();
        let mut command_buffer = self.device.create_command_buffer();
        command_buffer.enqueue();
        command(&mut *command_buffer);
        let in_flight = self.in_flight.clone();
        command_buffer.add_completed_handler(Box::new(move || in_flight.release()));
        StatCounters::add(&self.stats.command_buffers, 1);
        command_buffer.commit();
    }
}

/// Number of threadgroups needed to cover `grid`.
pub(crate) fn threadgroup_count(grid: [u32; 3], threads_per_group: [u32; 3]) -> [u32; 3] {
    let mut groups = [0; 3];
    for i in 0..3 {
        let threads = threads_per_group[i].max(1) as u64;
        groups[i] = ((grid[i] as u64 + threads - 1) / threads) as u32;
    }
    groups
}
