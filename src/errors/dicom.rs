use dicom::core::value::ConvertValueError;
use dicom::object::ReadError;
pub use snafu::{Snafu, Whatever};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DicomError {
    #[snafu(display("error reading DICOM file: {:?}", source))]
    ReadError {
        #[snafu(source(from(ReadError, Box::new)))]
        source: Box<ReadError>,
    },

    #[snafu(display("missing DICOM property: {}", name))]
    MissingPropertyError { name: &'static str },

    #[snafu(display("unable to convert DICOM property value '{}': {:?}", name, source))]
    ConvertValueError {
        name: &'static str,
        #[snafu(source(from(ConvertValueError, Box::new)))]
        source: Box<ConvertValueError>,
    },

    #[snafu(display("invalid DICOM property value '{}': {}", name, value))]
    InvalidValueError { name: &'static str, value: String },

    #[snafu(display("error processing DICOM pixel data: {:?}", source))]
    PixelDataError {
        #[snafu(source(from(dicom::pixeldata::Error, Box::new)))]
        source: Box<dicom::pixeldata::Error>,
    },

    #[snafu(display(
        "unsupported pixel layout: frames={}, samples_per_pixel={}",
        frames,
        samples
    ))]
    UnsupportedPixelLayout { frames: usize, samples: usize },

    #[snafu(display("{}", message))]
    Other { message: String },
}

impl From<Whatever> for DicomError {
    fn from(source: Whatever) -> Self {
        Self::Other {
            message: source.to_string(),
        }
    }
}
