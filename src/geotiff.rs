//! GeoTIFF output for score rasters.
//!
//! Writes a [`ScoreRaster`] as a single-band 32-bit float GeoTIFF in
//! geographic WGS84 coordinates, using pure Rust libraries (no GDAL
//! dependency). NaN pixels pass through unchanged; GIS tools render them
//! as nodata.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Tag;
use tracing::info;

use crate::error::{FinderError, Result};
use crate::raster::ScoreRaster;

// GeoTIFF tag IDs (not in the standard tiff crate)
const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
const GEOTIFF_MODELTIEPOINT: u16 = 33922;
const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
const GEOTIFF_GEOASCIIPARAMS: u16 = 34737;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;

// GeoKey values
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// EPSG code written into the output; all rasters here are lon/lat WGS84.
const EPSG_WGS84: u16 = 4326;

/// Compression method for GeoTIFF output.
#[derive(Debug, Clone, Copy, Default)]
pub enum GeoTiffCompression {
    /// No compression, fastest but largest files.
    #[default]
    None,
    /// LZW compression, good balance of speed and size.
    Lzw,
    /// Deflate (zlib) compression, better compression, slower.
    Deflate,
}

/// Builder for configuring GeoTIFF output.
pub struct GeoTiffWriter<'a> {
    raster: &'a ScoreRaster,
    compression: GeoTiffCompression,
}

impl<'a> GeoTiffWriter<'a> {
    #[must_use]
    pub fn new(raster: &'a ScoreRaster) -> Self {
        Self {
            raster,
            compression: GeoTiffCompression::default(),
        }
    }

    /// Set the compression method.
    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Write to a file path.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))?;
        info!(path = %path.display(), "score raster written");
        Ok(())
    }

    /// Write to any writer that implements `Write + Seek`.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let (rows, cols) = self.raster.shape();
        if rows == 0 || cols == 0 {
            return Err(FinderError::TiffEncode(
                "raster has zero dimensions".to_string(),
            ));
        }
        // Allow truncation: raster dimensions for valid regions fit in u32.
        #[allow(clippy::cast_possible_truncation)]
        let (width, height) = (cols as u32, rows as u32);

        let compression = match self.compression {
            GeoTiffCompression::None => Compression::Uncompressed,
            GeoTiffCompression::Lzw => Compression::Lzw,
            GeoTiffCompression::Deflate => Compression::Deflate(tiff::encoder::DeflateLevel::Fast),
        };

        let mut encoder = TiffEncoder::new(writer)?.with_compression(compression);
        let mut image = encoder.new_image::<Gray32Float>(width, height)?;
        self.write_geotiff_tags(image.encoder())?;
        image.write_data(self.raster.scores())?;
        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    ) -> Result<()> {
        let pix = self.raster.pixel_deg();
        let (west, north) = self.raster.origin();

        // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
        let pixel_scale = [pix, pix, 0.0];
        dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())?;

        // ModelTiepoint: ties pixel (0, 0) to the northwest corner.
        let tiepoint = [0.0, 0.0, 0.0, west, north, 0.0];
        dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())?;

        dir.write_tag(
            Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY),
            build_geokey_directory().as_slice(),
        )?;

        // GeoAsciiParams is pipe-delimited and null-terminated.
        if let Some(def) = crs_definitions::from_code(EPSG_WGS84) {
            let ascii_params = format!("{}|", def.proj4);
            dir.write_tag(Tag::Unknown(GEOTIFF_GEOASCIIPARAMS), ascii_params.as_bytes())?;
        }

        Ok(())
    }
}

/// GeoKeyDirectory for a geographic WGS84 raster:
/// `[Version, Revision, MinorRevision, NumberOfKeys, KeyID, Location, Count, Value, ...]`.
fn build_geokey_directory() -> Vec<u16> {
    vec![
        1, 1, 0, 3, // header: version 1.1.0, three keys
        GT_MODEL_TYPE_GEO_KEY, 0, 1, MODEL_TYPE_GEOGRAPHIC,
        GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, EPSG_WGS84,
    ]
}

impl ScoreRaster {
    /// Write this raster to a GeoTIFF file with WGS84 georeferencing.
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        GeoTiffWriter::new(self).write(path)
    }

    /// Encode this raster as GeoTIFF bytes.
    pub fn to_geotiff_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        GeoTiffWriter::new(self).write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }
}
