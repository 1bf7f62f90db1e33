use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::core::{
    domain::{FailureKind, FailureReason, ItemOutcome, WorkItem},
    traits::operation::Operation,
};

/// Writes, syncs, reads back and deletes one file per item under `dir`.
#[derive(Clone, Debug)]
pub struct DiskIo {
    dir: PathBuf,
    bytes_per_item: usize,
    run_id: Uuid,
}

impl DiskIo {
    pub fn new<T>(dir: T, bytes_per_item: usize) -> Self
    where
        T: AsRef<Path>,
    {
        DiskIo {
            dir: dir.as_ref().into(),
            bytes_per_item,
            run_id: Uuid::new_v4(),
        }
    }

    fn path_for(&self, item: WorkItem) -> PathBuf {
        self.dir.join(format!("{}-{}.bin", self.run_id, item.index))
    }
}

fn pattern(item: WorkItem, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64 ^ item.index as u64).wrapping_mul(31) >> 3) as u8)
        .collect()
}

async fn write_and_verify(path: &Path, data: &[u8]) -> ItemOutcome {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    let read = fs::read(path).await?;
    if read.len() != data.len() {
        return Err(FailureReason::new(
            FailureKind::Verification,
            format!("read back {} of {} bytes", read.len(), data.len()),
        ));
    }
    if read != data {
        return Err(FailureReason::new(
            FailureKind::Verification,
            "content read back differs from content written",
        ));
    }

    Ok(())
}

#[async_trait::async_trait]
impl Operation for DiskIo {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(item);
        let data = pattern(item, self.bytes_per_item);
        let outcome = write_and_verify(&path, &data).await;

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(%item, "Failed to remove {}: {}", path.display(), e);
                outcome?;
                return Err(e.into());
            }
        }

        outcome
    }
}
