use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The tag is not a known dtype, or not one accepted for the value's kind.
    #[snafu(display("unknown dtype: {tag}"))]
    UnknownDType { tag: String },
}
