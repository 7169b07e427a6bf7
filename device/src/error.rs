use snafu::{Location, Snafu};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A native driver call returned a non-success status.
    #[snafu(display("{location}: operation {call} failed: {message}"))]
    Driver {
        call: &'static str,
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    /// Entry point names cross the driver boundary as C strings.
    #[snafu(display("invalid entry point name {name:?}: contains an interior NUL byte"))]
    InvalidEntryName { name: String },

    /// Unrecognized driver name.
    #[snafu(display("invalid driver: {driver}"))]
    InvalidDriver { driver: String },

    #[snafu(display("driver {driver} requires the `{feature}` feature"))]
    DriverUnavailable { driver: String, feature: &'static str },
}

impl Error {
    /// Name of the failing native call, if this is a driver failure.
    pub fn call(&self) -> Option<&'static str> {
        match self {
            Self::Driver { call, .. } => Some(call),
            _ => None,
        }
    }
}
