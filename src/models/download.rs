use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Component, Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tar::Archive;
use zip::read::ZipArchive;

use super::manager::{ArchiveFormat, RemoteModelRecord};

const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub uri: String,
    pub archive_format: ArchiveFormat,
    pub destination: PathBuf,
    pub strip_prefix_components: u8,
    pub expected_size_bytes: Option<u64>,
    pub expected_checksum: Option<String>,
}

impl DownloadPlan {
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        let mut path = self.destination.clone();
        path.set_extension(format!("download.{}", self.archive_format.extension()));
        path
    }

    fn file_name(&self) -> String {
        filename_from_uri(&self.uri).unwrap_or_else(|| "model.tflite".to_string())
    }
}

pub fn plan_for(record: &RemoteModelRecord, models_dir: &Path) -> Option<DownloadPlan> {
    let source = record.source.as_ref()?;
    Some(DownloadPlan {
        uri: source.uri.clone(),
        archive_format: source.archive_format,
        destination: record.path(models_dir),
        strip_prefix_components: source.strip_prefix_components,
        expected_size_bytes: (record.size_bytes > 0).then_some(record.size_bytes),
        expected_checksum: record.checksum.clone(),
    })
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub final_path: PathBuf,
    pub archive_size_bytes: u64,
    pub checksum: String,
}

pub fn download_and_extract<F>(plan: &DownloadPlan, mut progress: F) -> Result<DownloadOutcome>
where
    F: FnMut(u64),
{
    let client = Client::builder().build().context("create http client")?;
    let staging = plan.staging_path();
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent).context("create staging directory")?;
    }

    fetch_to_file(&client, &plan.uri, &staging, &mut progress)?;
    let outcome = install_staged(plan, &staging);
    let _ = fs::remove_file(&staging);
    outcome
}

/// Verifies an archive already on disk and unpacks it into the plan's
/// destination, replacing whatever was installed there.
pub fn install_staged(plan: &DownloadPlan, staging: &Path) -> Result<DownloadOutcome> {
    let size = fs::metadata(staging)
        .context("stat downloaded file")?
        .len();
    if let Some(expected) = plan.expected_size_bytes {
        if size != expected {
            return Err(anyhow!(
                "size mismatch: expected {} bytes, got {}",
                expected,
                size
            ));
        }
    }

    let checksum = sha256_file(staging)?;
    if let Some(expected) = &plan.expected_checksum {
        if &checksum != expected {
            return Err(anyhow!(
                "checksum mismatch: expected {}, got {}",
                expected,
                checksum
            ));
        }
    }

    if plan.destination.exists() {
        fs::remove_dir_all(&plan.destination).with_context(|| {
            format!("remove existing destination {}", plan.destination.display())
        })?;
    }
    fs::create_dir_all(&plan.destination).context("create destination directory")?;

    let file = File::open(staging).context("open archive")?;
    match plan.archive_format {
        ArchiveFormat::TarGz => extract_tar(plan, GzDecoder::new(file))?,
        ArchiveFormat::TarBz2 => extract_tar(plan, BzDecoder::new(file))?,
        ArchiveFormat::Zip => extract_zip(plan, file)?,
        ArchiveFormat::File => copy_plain(plan, file)?,
    }

    Ok(DownloadOutcome {
        final_path: plan.destination.clone(),
        archive_size_bytes: size,
        checksum,
    })
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer).context("hash read")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

impl ArchiveFormat {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
            ArchiveFormat::File => "bin",
        }
    }
}

fn fetch_to_file<F>(client: &Client, uri: &str, path: &Path, progress: &mut F) -> Result<u64>
where
    F: FnMut(u64),
{
    let mut response = client
        .get(uri)
        .send()
        .with_context(|| format!("request {uri}"))?
        .error_for_status()
        .with_context(|| format!("download {uri}"))?;

    let mut file = File::create(path).context("create staging file")?;
    let mut downloaded = 0u64;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = response.read(&mut buffer).context("read download chunk")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .context("write download chunk")?;
        downloaded += read as u64;
        progress(downloaded);
    }
    Ok(downloaded)
}

fn extract_tar<R: Read>(plan: &DownloadPlan, reader: R) -> Result<()> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries().context("iterate tar entries")? {
        let mut entry = entry.context("read tar entry")?;
        let path = entry.path().context("read entry path")?.into_owned();
        let dest = destination_for(plan, &path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create entry parent")?;
        }
        entry.unpack(&dest).context("unpack tar entry")?;
    }
    Ok(())
}

fn extract_zip(plan: &DownloadPlan, file: File) -> Result<()> {
    let mut archive = ZipArchive::new(file).context("open zip archive")?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("read zip entry")?;
        let dest = destination_for(plan, &entry.mangled_name())?;
        if entry.is_dir() {
            fs::create_dir_all(&dest).context("create zip dir")?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create zip file parent")?;
        }
        let mut outfile = File::create(&dest).context("create zip file")?;
        io::copy(&mut entry, &mut outfile).context("write zip file")?;
    }
    Ok(())
}

fn copy_plain(plan: &DownloadPlan, mut file: File) -> Result<()> {
    let target = plan.destination.join(plan.file_name());
    let mut dest = File::create(&target).context("create target file")?;
    io::copy(&mut file, &mut dest).context("copy plain file")?;
    Ok(())
}

fn destination_for(plan: &DownloadPlan, path: &Path) -> Result<PathBuf> {
    let relative = strip_components(path, plan.strip_prefix_components).ok_or_else(|| {
        anyhow!(
            "unable to strip {} components from {:?}",
            plan.strip_prefix_components,
            path
        )
    })?;
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(anyhow!("archive entry {:?} escapes the model directory", path));
    }
    Ok(if relative.as_os_str() == "." {
        plan.destination.clone()
    } else {
        plan.destination.join(relative)
    })
}

fn filename_from_uri(uri: &str) -> Option<String> {
    let last_segment = uri.split('/').last()?;
    let clean = last_segment.split('?').next()?.split('#').next()?.trim();
    (!clean.is_empty()).then(|| clean.to_string())
}

fn strip_components(path: &Path, count: u8) -> Option<PathBuf> {
    let mut components = path.components();
    for _ in 0..count {
        components.next()?;
    }
    let stripped: PathBuf = components.collect();
    Some(if stripped.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        stripped
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::manager::ModelSource;

    fn plan(dir: &Path, format: ArchiveFormat, uri: &str) -> DownloadPlan {
        DownloadPlan {
            uri: uri.into(),
            archive_format: format,
            destination: dir.join("remote").join("flowers"),
            strip_prefix_components: 0,
            expected_size_bytes: None,
            expected_checksum: None,
        }
    }

    #[test]
    fn plan_requires_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RemoteModelRecord::new("flowers", None);
        assert!(plan_for(&record, dir.path()).is_none());

        record.source = Some(ModelSource {
            uri: "https://models.invalid/flowers.tar.gz".into(),
            archive_format: ArchiveFormat::TarGz,
            strip_prefix_components: 1,
        });
        let plan = plan_for(&record, dir.path()).unwrap();
        assert_eq!(plan.destination, dir.path().join("remote").join("flowers"));
        assert_eq!(plan.expected_size_bytes, None);
        assert_eq!(plan.strip_prefix_components, 1);
        assert!(plan
            .staging_path()
            .to_string_lossy()
            .ends_with("flowers.download.tar.gz"));
    }

    #[test]
    fn plain_file_is_installed_under_uri_name() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.bin");
        fs::write(&staged, b"tflite-bytes").unwrap();
        let plan = plan(
            dir.path(),
            ArchiveFormat::File,
            "https://models.invalid/model.tflite?alt=media",
        );

        let outcome = install_staged(&plan, &staged).unwrap();
        assert_eq!(outcome.archive_size_bytes, 12);
        assert_eq!(
            fs::read(outcome.final_path.join("model.tflite")).unwrap(),
            b"tflite-bytes"
        );
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.bin");
        fs::write(&staged, b"tflite-bytes").unwrap();
        let mut plan = plan(dir.path(), ArchiveFormat::File, "https://models.invalid/m");
        plan.expected_checksum = Some("00".into());

        let error = install_staged(&plan, &staged).unwrap_err();
        assert!(error.to_string().contains("checksum mismatch"));
        assert!(!plan.destination.exists());
    }

    #[test]
    fn zip_entries_are_stripped_and_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.zip");
        {
            let file = File::create(&staged).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::FileOptions::default();
            writer.start_file("export/manifest.json", options).unwrap();
            writer.write_all(b"{}").unwrap();
            writer.start_file("export/dict.txt", options).unwrap();
            writer.write_all(b"cat\ndog\n").unwrap();
            writer.finish().unwrap();
        }
        let mut plan = plan(dir.path(), ArchiveFormat::Zip, "https://models.invalid/x.zip");
        plan.strip_prefix_components = 1;

        let outcome = install_staged(&plan, &staged).unwrap();
        assert!(outcome.final_path.join("manifest.json").exists());
        assert_eq!(
            fs::read_to_string(outcome.final_path.join("dict.txt")).unwrap(),
            "cat\ndog\n"
        );
    }

    fn tar_gz_with_entry(staged: &Path, name: &[u8], contents: &[u8]) {
        let file = File::create(staged).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        // set_path refuses `..`, so write the raw name bytes.
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, contents).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn tar_entries_are_extracted_into_the_model_directory() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.tar.gz");
        tar_gz_with_entry(&staged, b"export/dict.txt", b"cat\n");
        let mut plan = plan(dir.path(), ArchiveFormat::TarGz, "https://models.invalid/x.tar.gz");
        plan.strip_prefix_components = 1;

        let outcome = install_staged(&plan, &staged).unwrap();
        assert_eq!(
            fs::read_to_string(outcome.final_path.join("dict.txt")).unwrap(),
            "cat\n"
        );
    }

    #[test]
    fn tar_entry_leaving_the_model_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.tar.gz");
        tar_gz_with_entry(&staged, b"../../escaped.txt", b"owned");
        let plan = plan(dir.path(), ArchiveFormat::TarGz, "https://models.invalid/x.tar.gz");

        let error = install_staged(&plan, &staged).unwrap_err();
        assert!(error.to_string().contains("escapes the model directory"));
        assert!(!dir.path().join("escaped.txt").exists());
        assert!(!dir.path().join("remote").join("escaped.txt").exists());
    }

    #[test]
    fn sha256_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
