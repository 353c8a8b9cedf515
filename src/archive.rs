//! Content-addressed on-disk dumps of mapped-texture pixel stores.
//!
//! Records are raw pixel bytes with no header; the params used to load a
//! record must describe exactly the stored byte count. A record's location
//! is the hex digest of the salted key, so two archives over the same root
//! with different salts never collide.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::device::Device;
use crate::errors::{Error, Result};
use crate::texture::{MappedTexture, TextureParams};

pub struct PixelArchive {
    root: PathBuf,
    salt: String,
}

impl PixelArchive {
    /// Opens (creating if needed) an archive rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P, salt: &str) -> Result<PixelArchive> {
        fs::create_dir_all(root.as_ref())?;

        Ok(PixelArchive {
            root: root.as_ref().to_path_buf(),
            salt: salt.to_string(),
        })
    }

    fn location(&self, key: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        self.salt.hash(&mut hasher);
        key.hash(&mut hasher);
        self.root.join(format!("{:016x}", hasher.finish()))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.location(key).is_file()
    }

    /// Dumps the texture's CPU store byte-for-byte under `key`, replacing
    /// any previous record.
    pub fn save(&self, key: &str, texture: &MappedTexture) -> Result<()> {
        let path = self.location(key);
        texture.use_readonly(|data| fs::write(&path, data))??;
        debug!("archived {} bytes under '{}'", texture.num_bytes(), key);
        Ok(())
    }

    /// Reconstructs a texture from the record under `key`. The supplied
    /// params must describe exactly the stored byte count.
    pub fn load(
        &self,
        device: &Arc<Device>,
        key: &str,
        params: TextureParams,
    ) -> Result<MappedTexture> {
        let path = self.location(key);
        if !path.is_file() {
            return Err(Error::NotFound(key.to_string()));
        }

        let bytes = fs::read(&path)?;
        if bytes.len() != params.bytes() {
            return Err(Error::OutOfBounds);
        }

        MappedTexture::from_decoded_image(device, params, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureFormat;
    use std::env;

    struct TempRoot(PathBuf);

    impl TempRoot {
        fn new(tag: &str) -> Self {
            let path = env::temp_dir().join(format!("glaze-archive-{}-{}", std::process::id(), tag));
            let _ = fs::remove_dir_all(&path);
            TempRoot(path)
        }
    }

    impl Drop for TempRoot {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn round_trip() {
        let root = TempRoot::new("round-trip");
        let archive = PixelArchive::new(&root.0, "salt").unwrap();
        let device = Device::headless().unwrap();

        let params = TextureParams::new(4, 4, TextureFormat::R8);
        let tex = MappedTexture::new(&device, params).unwrap();
        let pattern: Vec<u8> = (0..16u8).collect();
        tex.write_data(&pattern).unwrap();

        tex.save(&archive, "noise").unwrap();
        assert!(archive.exists("noise"));

        let loaded = MappedTexture::load(&archive, &device, "noise", params).unwrap();
        loaded
            .use_readonly(|data| assert_eq!(data, &pattern[..]))
            .unwrap();
    }

    #[test]
    fn missing_keys_are_reported() {
        let root = TempRoot::new("missing");
        let archive = PixelArchive::new(&root.0, "salt").unwrap();
        let device = Device::headless().unwrap();

        assert!(!archive.exists("nope"));
        match archive.load(
            &device,
            "nope",
            TextureParams::new(2, 2, TextureFormat::R8),
        ) {
            Err(Error::NotFound(key)) => assert_eq!(key, "nope"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn shape_must_match_the_record() {
        let root = TempRoot::new("shape");
        let archive = PixelArchive::new(&root.0, "salt").unwrap();
        let device = Device::headless().unwrap();

        let tex =
            MappedTexture::new(&device, TextureParams::new(4, 4, TextureFormat::R8)).unwrap();
        tex.save(&archive, "grid").unwrap();

        let wrong = TextureParams::new(2, 2, TextureFormat::R8);
        match archive.load(&device, "grid", wrong) {
            Err(Error::OutOfBounds) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn salts_keep_archives_apart() {
        let root = TempRoot::new("salts");
        let a = PixelArchive::new(&root.0, "alpha").unwrap();
        let b = PixelArchive::new(&root.0, "beta").unwrap();
        let device = Device::headless().unwrap();

        let tex =
            MappedTexture::new(&device, TextureParams::new(2, 2, TextureFormat::R8)).unwrap();
        tex.save(&a, "shared-key").unwrap();

        assert!(a.exists("shared-key"));
        assert!(!b.exists("shared-key"));
    }
}
