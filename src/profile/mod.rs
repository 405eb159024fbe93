//! Opt-in CPU profiling of sweep cases.
//!
//! [`profile_sweep`] runs a sweep like [`run_sweep`](crate::sweep::run_sweep)
//! but samples each case with `pprof` and writes one protobuf profile per
//! case, named after [`SweepCase::name`]. Open them with `go tool pprof` or
//! any pprof viewer.

use crate::error::{BenchError, Result};
use crate::executor::ExecutorFactory;
use crate::sweep::{self, SweepCase, SweepConfig, SweepRecord};
use pprof::protos::Message;
use pprof::ProfilerGuardBuilder;
use std::path::{Path, PathBuf};
use tracing::info;

/// Samples per second.
pub const SAMPLE_FREQUENCY: i32 = 1000;

/// Returns the profile path for `case` under `dir`.
#[must_use]
pub fn profile_path(dir: &Path, case: &SweepCase) -> PathBuf {
    dir.join(format!("{}.pb", case.name()))
}

/// Runs every case of `sweep` under the profiler.
///
/// Profiles land in `dir`, which is created if missing. A case whose
/// executor cannot be built is skipped and leaves no profile.
///
/// # Errors
///
/// Returns an error if the sweep is invalid, the profiler cannot start or
/// a profile cannot be written.
pub async fn profile_sweep(
    factory: &mut ExecutorFactory,
    sweep: &SweepConfig,
    dir: &Path,
) -> Result<Vec<SweepRecord>> {
    let cases = sweep.cases()?;
    std::fs::create_dir_all(dir)?;
    info!("Profiling sweep of {} cases into {}", cases.len(), dir.display());

    let mut records = Vec::with_capacity(cases.len());
    for (number, case) in cases.iter().enumerate() {
        let guard = ProfilerGuardBuilder::default()
            .frequency(SAMPLE_FREQUENCY)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()?;

        let Some(record) = sweep::run_case(factory, sweep, number, case).await else {
            continue;
        };

        let profile = guard.report().build()?.pprof()?;
        drop(guard);

        let mut content = Vec::new();
        profile
            .encode(&mut content)
            .map_err(|e| BenchError::Serialization(e.to_string()))?;
        let path = profile_path(dir, case);
        std::fs::write(&path, content)?;
        info!("Wrote profile for test {number} to {}", path.display());

        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ExecutorKind;
    use crate::task::TaskRuntime;

    #[tokio::test]
    async fn test_profile_sweep_writes_one_profile_per_case() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("results");
        let sweep = SweepConfig {
            types: vec![TaskRuntime::InProcess],
            executors: vec![ExecutorKind::Thread],
            times: vec![0.0, 0.02],
            ntasks: vec![8],
            workers: vec![2],
            num_nodes: vec![1],
            monitoring: vec![false],
            ..SweepConfig::default()
        };
        let mut factory = ExecutorFactory::new();

        let records = profile_sweep(&mut factory, &sweep, &out).await.unwrap();
        assert_eq!(records.len(), 2);

        for case in sweep.cases().unwrap() {
            let path = profile_path(&out, &case);
            assert!(path.exists(), "missing {}", path.display());
        }
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
        assert!(factory.active().is_none());
    }

    #[test]
    fn test_profile_path_uses_case_name() {
        let case = SweepConfig::default().cases().unwrap()[0];
        let path = profile_path(Path::new("results"), &case);
        assert_eq!(
            path,
            Path::new("results/python_n=6400_t=0_e=htex_w=64_nodes=1_m=True.pb")
        );
    }
}
