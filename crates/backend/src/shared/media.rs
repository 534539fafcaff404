use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Хранилище загруженных изображений
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Сохранить файл, вернуть публичный путь
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String>;

    /// Удалить файл по публичному пути. Отсутствующий файл не ошибка.
    async fn remove(&self, public_path: &str) -> Result<()>;

    /// Путь указывает в это хранилище (выдан `save`, а не внешняя ссылка)
    fn is_managed(&self, public_path: &str) -> bool;
}

/// Файлы на локальном диске, раздаются через `ServeDir`
pub struct LocalMediaStore {
    dir: PathBuf,
    public_prefix: String,
}

impl LocalMediaStore {
    pub fn new(dir: PathBuf, public_prefix: impl Into<String>) -> Self {
        Self {
            dir,
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Имя файла без каталогов, с уникальным префиксом
    fn stored_name(file_name: &str) -> String {
        let base = std::path::Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .replace(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'), "_");
        format!("{}-{}", uuid::Uuid::new_v4().simple(), base)
    }

    fn local_path(&self, public_path: &str) -> Option<PathBuf> {
        let name = public_path.strip_prefix(&self.public_prefix)?.strip_prefix('/')?;
        let name = std::path::Path::new(name).file_name()?;
        Some(self.dir.join(name))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create media dir {}", self.dir.display()))?;

        let name = Self::stored_name(file_name);
        let path = self.dir.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(format!("{}/{}", self.public_prefix, name))
    }

    fn is_managed(&self, public_path: &str) -> bool {
        self.local_path(public_path).is_some()
    }

    async fn remove(&self, public_path: &str) -> Result<()> {
        let Some(path) = self.local_path(public_path) else {
            tracing::debug!("Skipping removal of foreign media path {}", public_path);
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// Хранилище в памяти для тестов, запоминает удаления
#[cfg(test)]
#[derive(Default)]
pub struct MemoryMediaStore {
    pub saved: std::sync::Mutex<Vec<String>>,
    pub removed: std::sync::Mutex<Vec<String>>,
    pub fail_remove: bool,
}

#[cfg(test)]
#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn save(&self, file_name: &str, _bytes: &[u8]) -> Result<String> {
        let path = format!("/media/{}", file_name);
        self.saved.lock().unwrap().push(path.clone());
        Ok(path)
    }

    async fn remove(&self, public_path: &str) -> Result<()> {
        if self.fail_remove {
            anyhow::bail!("disk unavailable");
        }
        self.removed.lock().unwrap().push(public_path.to_string());
        Ok(())
    }

    fn is_managed(&self, public_path: &str) -> bool {
        public_path.starts_with("/media/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_name_strips_directories() {
        let name = LocalMediaStore::stored_name("../../etc/pass wd.png");
        assert!(name.ends_with("-pass_wd.png"));
        assert!(!name.contains('/'));
    }

    #[tokio::test]
    async fn save_and_remove_roundtrip_on_disk() {
        let dir = std::env::temp_dir().join(format!("media-{}", uuid::Uuid::new_v4()));
        let store = LocalMediaStore::new(dir.clone(), "/media/");

        let public = store.save("cover.jpg", b"jpeg").await.unwrap();
        assert!(public.starts_with("/media/"));
        let local = store.local_path(&public).unwrap();
        assert!(local.exists());

        store.remove(&public).await.unwrap();
        assert!(!local.exists());
        // повторное удаление не ошибка
        store.remove(&public).await.unwrap();
        store.remove("https://cdn.example.com/x.png").await.unwrap();
        assert!(store.is_managed(&public));
        assert!(!store.is_managed("https://cdn.example.com/x.png"));
        assert!(!store.is_managed("/mediafile.png"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
