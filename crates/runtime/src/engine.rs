// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The network with a type-state enforced lifecycle.
//!
//! ```text
//! Network<Idle>
//!     │  .load_model()          model.json + blob store
//!     ▼
//! Network<Loaded>
//!     │  .setup()               tiers, DMA, off-chip pool, blob staging
//!     ▼
//! Network<Ready>
//!     │  .run()  (any number of times)
//!     ▼
//!   PassReport
//! ```
//!
//! Each state transition consumes the old value and returns a new one, and
//! each state carries exactly the data it needs, so no accessor can observe
//! a half-built network.

use crate::blobs::{open_store, stage_blob, BlobStore};
use crate::checksum::{self, ChecksumMismatch, ChecksumTarget};
use crate::config::InputSource;
use crate::kernel::Layer;
use crate::kernels::reference_kernels;
use crate::layout::{offchip_tier_bytes, OffChipLayout};
use crate::reference::{first_difference, ReferenceExecutor, VerifyReport};
use crate::scheduler::{PassReport, Scheduler, SchedulerOptions};
use crate::staging::region_address;
use crate::{RuntimeConfig, RuntimeError};
use arena::{DualArena, Side};
use layer_table::{LayerTable, ModelManifest, Validated};
use transfer_engine::{Address, OffChipPool, Reservation, Tier, Tiers, TransferEngine};

/// Manifest filename inside a model directory.
pub const MANIFEST_FILE: &str = "model.json";

// ── Type-state markers ─────────────────────────────────────────

/// Network is configured but no model is loaded.
#[derive(Debug)]
pub struct Idle;

/// Layer table validated and blob store opened.
pub struct Loaded {
    table: LayerTable<Validated>,
    store: Box<dyn BlobStore>,
    kernels: Option<Vec<Box<dyn Layer>>>,
}

/// Tiers allocated, blobs staged off-chip, scheduler built.
pub struct Ready {
    scheduler: Scheduler,
    diagnostics: Vec<ChecksumMismatch>,
    reservations: Vec<Reservation>,
}

/// Sealed trait for network states.
pub trait NetworkState: sealed::Sealed {}
impl NetworkState for Idle {}
impl NetworkState for Loaded {}
impl NetworkState for Ready {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Idle {}
    impl Sealed for super::Loaded {}
    impl Sealed for super::Ready {}
}

// ── Network ────────────────────────────────────────────────────

/// A network bound to one target's memory tiers.
///
/// # Example
/// ```no_run
/// use runtime::{Network, RuntimeConfig};
///
/// # fn example() -> Result<(), runtime::RuntimeError> {
/// let mut network = Network::new(RuntimeConfig::default())
///     .load_model()?
///     .setup()?;
/// let report = network.run()?;
/// println!("{}", report.result);
/// println!("{}", report.metrics.summary());
/// # Ok(())
/// # }
/// ```
pub struct Network<S: NetworkState = Idle> {
    config: RuntimeConfig,
    state: S,
}

impl<S: NetworkState> Network<S> {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

// ── Idle → Loaded ──────────────────────────────────────────────

impl Network<Idle> {
    /// Creates a network from the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(
            "network created: {} cores, arena {}, input from {:?}",
            config.num_cores,
            config.onchip_arena,
            config.input_source
        );
        Self { config, state: Idle }
    }

    /// Loads `model.json` and opens the blob store of the model directory.
    pub fn load_model(self) -> Result<Network<Loaded>, RuntimeError> {
        let dir = &self.config.model_path;
        let manifest = ModelManifest::from_file(&dir.join(MANIFEST_FILE))?;
        let table = manifest.into_table()?.validate()?;
        tracing::info!("{}", table.summary());

        let store = open_store(dir)?;
        tracing::info!("blob store: {}", store.describe());
        Ok(Network::from_parts(self.config, table, store))
    }

    /// Builds a loaded network from an existing table and store.
    pub fn from_parts(
        config: RuntimeConfig,
        table: LayerTable<Validated>,
        store: Box<dyn BlobStore>,
    ) -> Network<Loaded> {
        Network {
            config,
            state: Loaded {
                table,
                store,
                kernels: None,
            },
        }
    }
}

// ── Loaded → Ready ─────────────────────────────────────────────

impl Network<Loaded> {
    pub fn table(&self) -> &LayerTable<Validated> {
        &self.state.table
    }

    /// Replaces the reference kernels with a custom dispatch table.
    pub fn with_kernels(mut self, kernels: Vec<Box<dyn Layer>>) -> Self {
        self.state.kernels = Some(kernels);
        self
    }

    /// Allocates the tiers, stages every weight blob and the input image
    /// off-chip and builds the scheduler.
    ///
    /// Steps:
    /// 1. Validate the configuration against the table.
    /// 2. Reserve the off-chip weights pool and activation buffers.
    /// 3. Copy blobs through a temporary on-chip frame, checking weight
    ///    checksums on the way.
    pub fn setup(self) -> Result<Network<Ready>, RuntimeError> {
        let config = self.config;
        let Loaded { table, store, kernels } = self.state;

        config.validate()?;
        let sizes = config.tier_sizes()?;
        let result_layout = config.layout()?;
        if table.output_bytes() < result_layout.byte_len() {
            return Err(RuntimeError::ConfigError(format!(
                "result layout '{}' needs {} bytes, the last layer outputs {}",
                result_layout.name(),
                result_layout.byte_len(),
                table.output_bytes()
            )));
        }
        let input_key = table.input_blob.clone();
        if config.input_source == InputSource::Offchip && input_key.is_none() {
            return Err(RuntimeError::ConfigError(
                "input_source = \"offchip\" but the model has no input blob".into(),
            ));
        }

        let tiers = Tiers::new(sizes.scratch, sizes.onchip_arena, offchip_tier_bytes(&sizes))?;
        let mut pool = OffChipPool::new(tiers.offchip.clone());
        let staged_input = if input_key.is_some() { table.input_bytes() } else { 0 };
        let layout = OffChipLayout::reserve(&mut pool, &table, &sizes, staged_input)?;
        let dma = TransferEngine::spawn(tiers)?;

        let mut arena = DualArena::new(sizes.onchip_arena);
        if config.journal {
            arena = arena.with_journal();
        }

        // Blobs travel through a frame at the end of the arena, away from
        // the frame buffer at its base.
        let frame = arena.allocate(config.transfer_chunk, Side::End)?;
        let frame_addr = region_address(&frame);
        let mut diagnostics = Vec::new();
        for layer in table.iter_layers().filter(|l| l.weight_bytes > 0) {
            let sum = stage_blob(
                store.as_ref(),
                layer.blob_key(),
                layer.weight_bytes,
                layout.weight_address(layer),
                &dma,
                frame_addr,
                config.transfer_chunk,
            )?;
            if config.verify_checksums {
                diagnostics.extend(checksum::check(layer, ChecksumTarget::Weights, sum));
            }
        }
        if let Some(key) = &input_key {
            stage_blob(
                store.as_ref(),
                key,
                table.input_bytes(),
                layout.input,
                &dma,
                frame_addr,
                config.transfer_chunk,
            )?;
        }
        arena.release(&frame)?;
        tracing::info!(
            "staged {} B of weights{} off-chip ({} mismatch(es))",
            table.total_weight_bytes(),
            if input_key.is_some() { " and the input image" } else { "" },
            diagnostics.len()
        );

        let kernels = kernels.unwrap_or_else(|| reference_kernels(&table.layers));
        let options = SchedulerOptions {
            num_cores: config.num_cores,
            scratch_partition: sizes.scratch / config.num_cores,
            verify_checksums: config.verify_checksums,
            input_source: config.input_source,
            result_layout,
            profiling: config.enable_profiling,
        };
        let reservations = pool.reservations().to_vec();
        let scheduler = Scheduler::new(table, kernels, dma, layout, options, arena)?;

        Ok(Network {
            config,
            state: Ready {
                scheduler,
                diagnostics,
                reservations,
            },
        })
    }
}

// ── Ready: run passes ──────────────────────────────────────────

impl Network<Ready> {
    /// Runs one inference pass.
    pub fn run(&mut self) -> Result<PassReport, RuntimeError> {
        let report = self.state.scheduler.run_pass()?;
        tracing::info!("{}", report.result);
        if self.config.enable_profiling {
            tracing::debug!("{}", report.metrics.summary());
        }
        Ok(report)
    }

    /// On-chip address of the frame buffer: the first layer's input region,
    /// at the base of the arena.
    pub fn frame_buffer(&self) -> Address {
        Address::in_tier(Tier::OnChip, 0)
    }

    /// Writes the next input frame into the frame buffer.
    pub fn write_frame(&self, frame: &[u8]) -> Result<(), RuntimeError> {
        if self.config.input_source != InputSource::Frame {
            return Err(RuntimeError::ConfigError(
                "write_frame requires input_source = \"frame\"".into(),
            ));
        }
        let expected = self.table().input_bytes();
        if frame.len() != expected {
            return Err(RuntimeError::ConfigError(format!(
                "frame has {} bytes, the first layer expects {expected}",
                frame.len()
            )));
        }
        self.tiers().onchip.write(self.frame_buffer(), frame)?;
        Ok(())
    }

    /// Runs one pass and checks it against the single-buffered reference.
    pub fn verify(&mut self) -> Result<VerifyReport, RuntimeError> {
        let tiers = self.tiers().clone();
        let offchip = tiers.offchip.read(tiers.offchip.base(), tiers.offchip.len())?;
        let input_bytes = self.table().input_bytes();
        let input = match self.config.input_source {
            InputSource::Frame => tiers.onchip.read(self.frame_buffer(), input_bytes)?,
            InputSource::Offchip => tiers.offchip.read(self.state.scheduler.layout().input, input_bytes)?,
        };

        let pipelined = self.run()?;
        let scheduler = &self.state.scheduler;
        let reference_output = ReferenceExecutor::new(scheduler.table(), scheduler.kernels(), scheduler.layout())
            .run(&offchip, tiers.scratch.len(), &input)?;

        let first_difference = first_difference(&pipelined.output, &reference_output);
        match first_difference {
            None => tracing::info!("pipelined output matches the reference"),
            Some(at) => tracing::warn!("pipelined output differs from the reference at byte {at}"),
        }
        Ok(VerifyReport {
            pipelined,
            reference_output,
            first_difference,
        })
    }

    pub fn table(&self) -> &LayerTable<Validated> {
        self.state.scheduler.table()
    }

    pub fn tiers(&self) -> &Tiers {
        self.state.scheduler.dma().tiers()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.state.scheduler
    }

    /// Weight checksum mismatches found while staging blobs.
    pub fn setup_diagnostics(&self) -> &[ChecksumMismatch] {
        &self.state.diagnostics
    }

    /// Off-chip reservations made at setup.
    pub fn reservations(&self) -> &[Reservation] {
        &self.state.reservations
    }
}

impl<S: NetworkState> std::fmt::Debug for Network<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("state", &std::any::type_name::<S>())
            .field("model_path", &self.config.model_path)
            .field("num_cores", &self.config.num_cores)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::MemoryBlobs;
    use layer_table::{LayerDescriptor, LayerKind};

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            onchip_arena: "4K".into(),
            scratch: "256".into(),
            offchip_weights: "1K".into(),
            offchip_activations: "256".into(),
            num_cores: 2,
            result_layout: "regression".into(),
            input_source: InputSource::Frame,
            transfer_chunk: 16,
            ..RuntimeConfig::default()
        }
    }

    fn table() -> LayerTable<Validated> {
        LayerTable::new(
            "tiny",
            vec![
                LayerDescriptor::new("conv0", 0, LayerKind::Conv, 16, 16, 20),
                LayerDescriptor::new("fc1", 1, LayerKind::Gemm, 16, 8, 12),
            ],
        )
        .validate()
        .unwrap()
    }

    fn store() -> Box<dyn BlobStore> {
        Box::new(
            MemoryBlobs::new()
                .with("conv0", (0..20).map(|i| i as u8).collect())
                .with("fc1", vec![3; 12]),
        )
    }

    #[test]
    fn test_setup_stages_weights() {
        let network = Network::from_parts(config(), table(), store()).setup().unwrap();
        let tiers = network.tiers();
        let layout = *network.scheduler().layout();
        assert_eq!(
            tiers.offchip.read(layout.weights, 20).unwrap(),
            (0..20).map(|i| i as u8).collect::<Vec<_>>()
        );
        assert_eq!(tiers.offchip.read(layout.weights.add(20), 12).unwrap(), vec![3; 12]);
        assert!(network.setup_diagnostics().is_empty());
        assert_eq!(network.reservations().len(), 3);
    }

    #[test]
    fn test_frame_mode_run() {
        let mut network = Network::from_parts(config(), table(), store()).setup().unwrap();
        network.write_frame(&[5; 16]).unwrap();
        let report = network.run().unwrap();
        assert_eq!(report.output.len(), 8);
        assert_eq!(report.result.values.len(), 2);
        assert!(network.write_frame(&[5; 4]).is_err());
    }

    #[test]
    fn test_offchip_source_requires_input_blob() {
        let config = RuntimeConfig {
            input_source: InputSource::Offchip,
            ..config()
        };
        let err = Network::from_parts(config, table(), store()).setup().unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigError(_)));
    }

    #[test]
    fn test_missing_blob_fails_setup() {
        let store = Box::new(MemoryBlobs::new().with("conv0", vec![0; 20]));
        let err = Network::from_parts(config(), table(), store).setup().unwrap_err();
        assert!(matches!(err, RuntimeError::Blob { .. }));
    }

    #[test]
    fn test_layout_larger_than_output() {
        let config = RuntimeConfig {
            result_layout: "imav".into(),
            ..config()
        };
        assert!(Network::from_parts(config, table(), store()).setup().is_err());
    }

    #[test]
    fn test_load_model_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            model_path: dir.path().to_path_buf(),
            ..config()
        };
        let err = Network::new(config).load_model().unwrap_err();
        assert!(matches!(err, RuntimeError::Table(_)));
        assert!(err.is_missing_model());
    }

    #[test]
    fn test_load_model_malformed_manifest_is_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        let config = RuntimeConfig {
            model_path: dir.path().to_path_buf(),
            ..config()
        };
        let err = Network::new(config).load_model().unwrap_err();
        assert!(matches!(err, RuntimeError::Table(_)));
        assert!(!err.is_missing_model());
    }

    #[test]
    fn test_load_model_missing_blob_is_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        crate::demo::write_model_dir(dir.path()).unwrap();
        std::fs::remove_file(dir.path().join(format!("{}.bin", crate::demo::INPUT_BLOB))).unwrap();
        let config = RuntimeConfig {
            model_path: dir.path().to_path_buf(),
            ..crate::demo::demo_config()
        };
        let err = Network::new(config).load_model().and_then(|n| n.setup()).unwrap_err();
        assert!(matches!(err, RuntimeError::Blob { .. }));
        assert!(!err.is_missing_model());
    }
}
