//! GeoTIFF reading and writing
//!
//! Uses the `tiff` crate directly. Georeferencing is carried in the
//! ModelPixelScale/ModelTiepoint tags, the nodata sentinel in the
//! GDAL_NODATA ascii tag, so files interoperate with GDAL-based tooling.

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::geometry::Bbox;
use crate::raster::{GeoTransform, Raster, RasterElement};
use log::debug;
use std::fs::File;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{Gray32Float, Gray8};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

/// Reads rectangular windows of a single-band GeoTIFF.
///
/// The file is decoded once on open; windows are sliced from the decoded
/// grid. A window that reaches outside the stored extent is a read error,
/// callers intersect their request with [`RasterReader::bbox`] first when
/// partial coverage is acceptable.
#[derive(Debug)]
pub struct RasterReader<T: RasterElement> {
    path: PathBuf,
    raster: Raster<T>,
}

impl<T: RasterElement> RasterReader<T> {
    /// Open and decode a GeoTIFF file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::read(&path, e))?;
        let raster = decode(&path, file)?;
        debug!(
            "opened '{}': {:?} cells, nodata {:?}",
            path.display(),
            raster.shape(),
            raster.nodata().and_then(RasterElement::to_f64),
        );
        Ok(Self { path, raster })
    }

    /// Covering Bbox of the stored raster.
    pub fn bbox(&self) -> Bbox {
        self.raster.bbox()
    }

    /// Cell size of the stored raster.
    pub fn resolution(&self) -> f64 {
        self.raster.resolution()
    }

    /// Nodata sentinel of the stored raster, if any.
    pub fn nodata(&self) -> Option<T> {
        self.raster.nodata()
    }

    /// Shape (rows, cols) of the stored raster.
    pub fn shape(&self) -> (usize, usize) {
        self.raster.shape()
    }

    pub fn transform(&self) -> &GeoTransform {
        self.raster.transform()
    }

    /// Read the entire raster.
    pub fn read_raster(&self) -> Raster<T> {
        self.raster.clone()
    }

    /// Read the window covering `bbox`.
    ///
    /// Fails when the window reaches outside the stored extent.
    pub fn read_window(&self, bbox: &Bbox) -> Result<Raster<T>> {
        let window = self.raster.transform().bbox_to_window(bbox);
        if !window.fits(self.raster.rows(), self.raster.cols()) {
            return Err(Error::read(
                &self.path,
                format!("window {:?} outside raster extent", window),
            ));
        }
        self.raster.window(&window)
    }
}

fn decode<T: RasterElement>(path: &Path, file: File) -> Result<Raster<T>> {
    let mut decoder = Decoder::new(file).map_err(|e| Error::read(path, e))?;

    let (width, height) = decoder.dimensions().map_err(|e| Error::read(path, e))?;
    let rows = height as usize;
    let cols = width as usize;

    let result = decoder.read_image().map_err(|e| Error::read(path, e))?;
    let data: Vec<T> = match result {
        DecodingResult::U8(buf) => cast_buffer(&buf),
        DecodingResult::U16(buf) => cast_buffer(&buf),
        DecodingResult::U32(buf) => cast_buffer(&buf),
        DecodingResult::I16(buf) => cast_buffer(&buf),
        DecodingResult::I32(buf) => cast_buffer(&buf),
        DecodingResult::F32(buf) => cast_buffer(&buf),
        DecodingResult::F64(buf) => cast_buffer(&buf),
        _ => {
            return Err(Error::read(path, "unsupported TIFF pixel format"));
        }
    };

    if data.len() != rows * cols {
        return Err(Error::read(
            path,
            format!("expected {} cells, decoded {}", rows * cols, data.len()),
        ));
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    raster.set_transform(read_geotransform(&mut decoder, path)?);

    // GDAL_NODATA is an ascii-encoded number; absence just means no sentinel
    if let Ok(text) = decoder.get_tag_ascii_string(Tag::GdalNodata) {
        let trimmed = text.trim_end_matches('\0').trim().to_string();
        if let Ok(value) = trimmed.parse::<f64>() {
            raster.set_nodata(T::from_f64(value));
        }
    }

    if let Some(epsg) = read_epsg(&mut decoder) {
        raster.set_crs(Some(Crs::from_epsg(epsg)));
    }

    Ok(raster)
}

/// Scan the GeoKey directory for ProjectedCSTypeGeoKey (3072).
fn read_epsg<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder
        .get_tag_u32_vec(Tag::GeoKeyDirectoryTag)
        .ok()?;
    // Entries of four shorts each, after the 4-short header
    keys.chunks_exact(4)
        .skip(1)
        .find(|entry| entry[0] == 3072)
        .map(|entry| entry[3])
}

fn cast_buffer<S, T>(buf: &[S]) -> Vec<T>
where
    S: Copy + num_traits::NumCast,
    T: RasterElement,
{
    buf.iter()
        .map(|&v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

/// Read the geotransform from ModelPixelScale + ModelTiepoint.
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::read(path, "missing ModelPixelScale tag"))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::read(path, "missing ModelTiepoint tag"))?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(Error::read(path, "malformed georeferencing tags"));
    }

    // tiepoint: [I, J, K, X, Y, Z]; scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// Write a raster as a single-band GeoTIFF, creating or overwriting `path`.
///
/// Float rasters are encoded as 32-bit float, integer rasters (class codes)
/// as 8-bit unsigned.
pub fn write_raster<T: RasterElement>(path: impl AsRef<Path>, raster: &Raster<T>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::write(path, e))?;
    let mut encoder = TiffEncoder::new(file).map_err(|e| Error::write(path, e))?;

    let (rows, cols) = raster.shape();
    debug!("writing '{}': {:?} cells", path.display(), (rows, cols));

    if T::is_float() {
        let data: Vec<f32> = raster
            .data()
            .iter()
            .map(|&v| v.to_f64().map(|f| f as f32).unwrap_or(f32::NAN))
            .collect();
        let mut image = encoder
            .new_image::<Gray32Float>(cols as u32, rows as u32)
            .map_err(|e| Error::write(path, e))?;
        write_geo_tags(image.encoder(), raster, path)?;
        image.write_data(&data).map_err(|e| Error::write(path, e))?;
    } else {
        let data: Vec<u8> = raster
            .data()
            .iter()
            .map(|&v| v.to_f64().and_then(|f| num_traits::cast(f)).unwrap_or(0u8))
            .collect();
        let mut image = encoder
            .new_image::<Gray8>(cols as u32, rows as u32)
            .map_err(|e| Error::write(path, e))?;
        write_geo_tags(image.encoder(), raster, path)?;
        image.write_data(&data).map_err(|e| Error::write(path, e))?;
    }

    Ok(())
}

fn write_geo_tags<T, W>(
    dir: &mut tiff::encoder::DirectoryEncoder<'_, W, tiff::encoder::TiffKindStandard>,
    raster: &Raster<T>,
    path: &Path,
) -> Result<()>
where
    T: RasterElement,
    W: std::io::Write + std::io::Seek,
{
    let gt = raster.transform();

    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &scale[..])
        .map_err(|e| Error::write(path, e))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), &tiepoint[..])
        .map_err(|e| Error::write(path, e))?;

    // Minimal GeoKey directory: projected model, pixel-is-area, plus the
    // EPSG code when the raster carries one
    let mut geokeys: Vec<u16> = vec![
        1, 1, 0, 2, //
        1024, 0, 1, 1, //
        1025, 0, 1, 1, //
    ];
    if let Some(epsg) = raster.crs().and_then(|crs| crs.epsg()) {
        if epsg <= u16::MAX as u32 {
            geokeys[3] = 3;
            geokeys.extend_from_slice(&[3072, 0, 1, epsg as u16]);
        }
    }
    dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), geokeys.as_slice())
        .map_err(|e| Error::write(path, e))?;

    if let Some(nodata) = raster.nodata() {
        if let Some(value) = nodata.to_f64() {
            let text = format!("{}", value);
            dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_str())
                .map_err(|e| Error::write(path, e))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn sample_raster() -> Raster<f64> {
        let mut raster: Raster<f64> = Raster::new(8, 6);
        raster.set_transform(GeoTransform::north_up(720000.0, 6180000.0, 0.4));
        raster.set_crs(Some(Crs::from_epsg(25832)));
        raster.set_nodata(Some(-999.0));
        for row in 0..8 {
            for col in 0..6 {
                raster.set(row, col, (row * 6 + col) as f64).unwrap();
            }
        }
        raster
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amplitude.tif");

        let raster = sample_raster();
        write_raster(&path, &raster).unwrap();

        let reader: RasterReader<f64> = RasterReader::open(&path).unwrap();
        assert_eq!(reader.shape(), (8, 6));
        assert_relative_eq!(reader.resolution(), 0.4, epsilon = 1e-9);
        assert_eq!(reader.nodata(), Some(-999.0));

        let b = reader.bbox();
        assert_relative_eq!(b.xmin, 720000.0, epsilon = 1e-6);
        assert_relative_eq!(b.ymax, 6180000.0, epsilon = 1e-6);

        let loaded = reader.read_raster();
        assert_eq!(loaded.get(3, 4).unwrap(), raster.get(3, 4).unwrap());
        assert_eq!(loaded.crs().and_then(|c| c.epsg()), Some(25832));
    }

    #[test]
    fn test_u8_roundtrip_keeps_classes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classes.tif");

        let mut raster: Raster<u8> = Raster::filled(4, 4, 3);
        raster.set_transform(GeoTransform::north_up(0.0, 4.0, 1.0));
        raster.set_nodata(Some(255));
        raster.set(0, 0, 255).unwrap();
        write_raster(&path, &raster).unwrap();

        let reader: RasterReader<u8> = RasterReader::open(&path).unwrap();
        let loaded = reader.read_raster();
        assert_eq!(loaded.get(0, 0).unwrap(), 255);
        assert_eq!(loaded.get(2, 2).unwrap(), 3);
        assert_eq!(loaded.nodata(), Some(255));
    }

    #[test]
    fn test_read_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("window.tif");
        write_raster(&path, &sample_raster()).unwrap();

        let reader: RasterReader<f64> = RasterReader::open(&path).unwrap();
        // Two cells in, two cells down, 2x2 cells
        let bbox = Bbox::new(720000.8, 6180000.0 - 1.6, 720001.6, 6180000.0 - 0.8).unwrap();
        let sub = reader.read_window(&bbox).unwrap();
        assert_eq!(sub.shape(), (2, 2));
        assert_eq!(sub.get(0, 0).unwrap(), 14.0);

        // A bbox reaching outside the stored extent is a read error
        let outside = Bbox::new(719999.0, 6179999.0, 720001.0, 6180001.0).unwrap();
        assert!(reader.read_window(&outside).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let err = RasterReader::<f64>::open("/no/such/file.tif").unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }
}
