// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The core team.
//!
//! Core 0 is the calling thread and does all the orchestration. Cores
//! `1..num_cores` are scoped threads that park on the start barrier until
//! core 0 publishes the next kernel call:
//!
//! ```text
//! core 0:  publish step ─► start ─► kernel ─► done ─► collect failures
//! core k:           wait ─► start ─► kernel ─► done ─► wait ...
//! ```
//!
//! Dropping the dispatcher publishes a shutdown step, so the team is
//! released and joined on every exit path, including errors.

use crate::kernel::{CoreBarrier, KernelArgs, KernelContext, KernelError, Layer};
use crate::RuntimeError;
use layer_table::LayerDescriptor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Barrier, Mutex, PoisonError};
use transfer_engine::{Tiers, TransferEngine};

/// What the kernels of a pass may touch.
pub(crate) struct KernelEnv<'a> {
    pub kernels: &'a [Box<dyn Layer>],
    pub layers: &'a [LayerDescriptor],
    pub tiers: &'a Tiers,
    pub dma: &'a TransferEngine,
    /// Bytes of scratch per core.
    pub scratch_partition: usize,
}

struct Shared {
    /// `None` tells the workers to exit.
    step: Mutex<Option<(usize, KernelArgs)>>,
    start: Barrier,
    done: Barrier,
    sync: CoreBarrier,
    failures: Mutex<Vec<(usize, KernelError)>>,
}

/// Core 0's handle on a running team.
pub(crate) struct Dispatcher<'s, 'a> {
    shared: &'s Shared,
    env: &'s KernelEnv<'a>,
    num_cores: usize,
}

/// Runs `body` with a team of `num_cores` cores, the caller being core 0.
pub(crate) fn with_team<R>(
    num_cores: usize,
    env: &KernelEnv<'_>,
    body: impl FnOnce(&mut Dispatcher<'_, '_>) -> R,
) -> R {
    let num_cores = num_cores.max(1);
    let shared = Shared {
        step: Mutex::new(None),
        start: Barrier::new(num_cores),
        done: Barrier::new(num_cores),
        sync: CoreBarrier::new(num_cores),
        failures: Mutex::new(Vec::new()),
    };

    std::thread::scope(|s| {
        for core in 1..num_cores {
            let shared = &shared;
            s.spawn(move || worker(core, num_cores, shared, env));
        }
        let mut dispatcher = Dispatcher {
            shared: &shared,
            env,
            num_cores,
        };
        body(&mut dispatcher)
    })
}

fn worker(core: usize, num_cores: usize, shared: &Shared, env: &KernelEnv<'_>) {
    loop {
        shared.start.wait();
        let step = *shared.step.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((layer, args)) = step else {
            tracing::trace!("core {core} exiting");
            return;
        };
        if let Err(e) = run_core(env, core, num_cores, layer, args, &shared.sync) {
            shared
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((core, e));
        }
        shared.done.wait();
    }
}

fn run_core(
    env: &KernelEnv<'_>,
    core: usize,
    num_cores: usize,
    layer: usize,
    args: KernelArgs,
    sync: &CoreBarrier,
) -> Result<(), KernelError> {
    let (Some(kernel), Some(desc)) = (env.kernels.get(layer), env.layers.get(layer)) else {
        return Err(KernelError::InvalidArgs(format!("no kernel for layer {layer}")));
    };
    let ctx = KernelContext::new(args, core, num_cores, desc, env.tiers, env.dma, env.scratch_partition, sync);
    let result = catch_unwind(AssertUnwindSafe(|| kernel.execute(&ctx))).unwrap_or(Err(KernelError::Panicked));
    if result.is_err() {
        sync.abort();
    }
    result
}

impl Dispatcher<'_, '_> {
    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    /// Runs the kernel of `layer` on every core and waits for all of them.
    ///
    /// The first failure, lowest core first, is returned. Cores that were
    /// only released from the in-kernel barrier by that failure report
    /// [`KernelError::Aborted`] and rank after it.
    pub fn execute(&mut self, layer: usize, args: KernelArgs) -> Result<(), RuntimeError> {
        self.shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.shared.sync.reset();
        *self.shared.step.lock().unwrap_or_else(PoisonError::into_inner) = Some((layer, args));

        self.shared.start.wait();
        let own = run_core(self.env, 0, self.num_cores, layer, args, &self.shared.sync);
        self.shared.done.wait();

        let mut failures = std::mem::take(
            &mut *self.shared.failures.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if let Err(e) = own {
            failures.push((0, e));
        }
        failures.sort_by_key(|(core, e)| (*e == KernelError::Aborted, *core));

        match failures.into_iter().next() {
            None => Ok(()),
            Some((core, source)) => {
                let name = self
                    .env
                    .layers
                    .get(layer)
                    .map(|l| l.name.clone())
                    .unwrap_or_else(|| format!("#{layer}"));
                Err(RuntimeError::Kernel {
                    layer: name,
                    core,
                    source,
                })
            }
        }
    }
}

impl Drop for Dispatcher<'_, '_> {
    fn drop(&mut self) {
        *self.shared.step.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.start.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layer_table::LayerKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Counting {
        calls: Arc<AtomicUsize>,
        cores_seen: Arc<AtomicUsize>,
    }

    impl Layer for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cores_seen.fetch_or(1 << ctx.core_id, Ordering::SeqCst);
            ctx.barrier()
        }
    }

    struct Failing;

    impl Layer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError> {
            match ctx.core_id {
                2 => panic!("core 2 gave up"),
                3 => Err(KernelError::InvalidArgs("bad".into())),
                _ => Ok(()),
            }
        }
    }

    /// Core 1 fails before the in-kernel barrier the others wait on.
    struct FailsBeforeSync;

    impl Layer for FailsBeforeSync {
        fn name(&self) -> &str {
            "fails-before-sync"
        }

        fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError> {
            if ctx.core_id == 1 {
                return Err(KernelError::InvalidArgs("core 1 rejects its share".into()));
            }
            ctx.barrier()?;
            ctx.barrier()
        }
    }

    fn layers(n: usize) -> Vec<LayerDescriptor> {
        (0..n)
            .map(|i| LayerDescriptor::new(format!("l{i}"), i, LayerKind::Identity, 4, 4, 0))
            .collect()
    }

    #[test]
    fn test_every_core_runs_every_call() {
        let tiers = Tiers::new(64, 64, 64).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        let counting = Counting {
            calls: Arc::new(AtomicUsize::new(0)),
            cores_seen: Arc::new(AtomicUsize::new(0)),
        };
        let kernels: Vec<Box<dyn Layer>> = vec![Box::new(counting.clone()), Box::new(counting.clone())];
        let descs = layers(2);
        let env = KernelEnv {
            kernels: &kernels,
            layers: &descs,
            tiers: &tiers,
            dma: &dma,
            scratch_partition: 16,
        };

        with_team(4, &env, |team| {
            team.execute(0, KernelArgs::default()).unwrap();
            team.execute(1, KernelArgs::default()).unwrap();
        });
        assert_eq!(counting.calls.load(Ordering::SeqCst), 8);
        assert_eq!(counting.cores_seen.load(Ordering::SeqCst), 0b1111);
    }

    #[test]
    fn test_failures_are_reported_lowest_core_first() {
        let tiers = Tiers::new(64, 64, 64).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        let kernels: Vec<Box<dyn Layer>> = vec![Box::new(Failing)];
        let descs = layers(1);
        let env = KernelEnv {
            kernels: &kernels,
            layers: &descs,
            tiers: &tiers,
            dma: &dma,
            scratch_partition: 16,
        };

        let err = with_team(4, &env, |team| team.execute(0, KernelArgs::default())).unwrap_err();
        match err {
            RuntimeError::Kernel { layer, core, source } => {
                assert_eq!(layer, "l0");
                assert_eq!(core, 2);
                assert_eq!(source, KernelError::Panicked);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failure_before_barrier_aborts_the_call() {
        let tiers = Tiers::new(64, 64, 64).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Counting {
            calls: calls.clone(),
            cores_seen: Arc::new(AtomicUsize::new(0)),
        };
        let kernels: Vec<Box<dyn Layer>> = vec![Box::new(FailsBeforeSync), Box::new(counting)];
        let descs = layers(2);
        let env = KernelEnv {
            kernels: &kernels,
            layers: &descs,
            tiers: &tiers,
            dma: &dma,
            scratch_partition: 16,
        };

        with_team(4, &env, |team| {
            match team.execute(0, KernelArgs::default()).unwrap_err() {
                RuntimeError::Kernel { core, source, .. } => {
                    assert_eq!(core, 1);
                    assert!(matches!(source, KernelError::InvalidArgs(_)));
                }
                other => panic!("unexpected error: {other}"),
            }
            // The barrier is re-armed for the next call.
            team.execute(1, KernelArgs::default()).unwrap();
        });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_single_core_team() {
        let tiers = Tiers::new(64, 64, 64).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        let kernels: Vec<Box<dyn Layer>> = vec![Box::new(Failing)];
        let descs = layers(1);
        let env = KernelEnv {
            kernels: &kernels,
            layers: &descs,
            tiers: &tiers,
            dma: &dma,
            scratch_partition: 64,
        };
        let result = with_team(1, &env, |team| {
            assert_eq!(team.num_cores(), 1);
            team.execute(0, KernelArgs::default())
        });
        assert!(result.is_ok());
        assert!(with_team(1, &env, |team| team.execute(7, KernelArgs::default())).is_err());
    }
}
