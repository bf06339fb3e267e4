use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::{ready, Stream};
use pin_project_lite::pin_project;
use sha1::{Digest, Sha1};
use tracing::trace;

use crate::util::checksum::{Checksum, ChecksumAlgorithm, ChecksumFailure};

/// This struct wraps a body (an HTTP response or a file), allowing it to be consumed asynchronously
///  without materializing it but at the same time performing validation that requires knowledge
///  of the entire body's data (e.g. SHA1 checksum check).
///
/// The actual contract is to append an (empty) chunk of data to the stream with an error if the
///  validation fails. Once a stream chunk with an error was returned, this stream will stop
///  polling from upstream and always return an error. A failed checksum is reported as a
///  [ChecksumFailure] that callers can downcast to.
pin_project! {
    pub struct ValidatingBody<S> {
        #[pin]
        body: S,
        validators: Vec<Box<dyn BodyValidator>>,
        is_failed: bool,
    }
}

impl <S> ValidatingBody<S> {
    pub fn new(body: S, validators: Vec<Box<dyn BodyValidator>>) -> ValidatingBody<S> {
        ValidatingBody {
            body,
            validators,
            is_failed: false,
        }
    }
}

impl <S, E> Stream for ValidatingBody<S>
where S: Stream<Item = Result<Bytes, E>>,
      E: Into<anyhow::Error>,
{
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_failed {
            return Poll::Ready(Some(Err(anyhow::Error::msg("polling from failed stream"))));
        }

        let this = self.project();
        let inner = ready!(this.body.poll_next(cx));
        match inner {
            Some(Ok(data)) => {
                // available data from the wrapped body -> pass this on
                for validator in this.validators.iter_mut() {
                    validator.add_data(&data);
                }
                Poll::Ready(Some(Ok(data)))
            }
            None => {
                // wrapped body is fully drained -> finalize validation
                for validator in this.validators.iter() {
                    if let Err(failure) = validator.validate() {
                        *this.is_failed = true;
                        return Poll::Ready(Some(Err(failure.into())));
                    }
                }
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                *this.is_failed = true;
                Poll::Ready(Some(Err(e.into())))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.body.size_hint()
    }
}

pub trait BodyValidator: Send {
    fn add_data(&mut self, data: &Bytes);
    fn validate(&self) -> Result<(), ChecksumFailure>;
}

pub fn validator_for(checksum: &Checksum) -> Box<dyn BodyValidator> {
    match checksum {
        Checksum::Sha1(h) => Box::new(Sha1BodyValidator::new(*h)),
        Checksum::Md5(h) => Box::new(Md5BodyValidator::new(*h)),
    }
}

pub struct Sha1BodyValidator {
    hasher: Sha1,
    expected_hash: [u8; 20],
}
impl Sha1BodyValidator {
    pub fn new(expected_hash: [u8; 20]) -> Sha1BodyValidator {
        Sha1BodyValidator {
            hasher: Default::default(),
            expected_hash,
        }
    }
}
impl BodyValidator for Sha1BodyValidator {
    fn add_data(&mut self, data: &Bytes) {
        self.hasher.update(data);
    }

    fn validate(&self) -> Result<(), ChecksumFailure> {
        let hash: [u8; 20] = self.hasher.clone().finalize().into();
        trace!("validating SHA1 hash");
        if hash == self.expected_hash {
            Ok(())
        }
        else {
            Err(ChecksumFailure {
                algorithm: ChecksumAlgorithm::Sha1,
                expected: hex::encode(self.expected_hash),
                actual: hex::encode(hash),
            })
        }
    }
}

pub struct Md5BodyValidator {
    context: md5::Context,
    expected_hash: [u8; 16],
}
impl Md5BodyValidator {
    pub fn new(expected_hash: [u8; 16]) -> Md5BodyValidator {
        Md5BodyValidator {
            context: md5::Context::new(),
            expected_hash,
        }
    }
}
impl BodyValidator for Md5BodyValidator {
    fn add_data(&mut self, data: &Bytes) {
        self.context.consume(data);
    }

    fn validate(&self) -> Result<(), ChecksumFailure> {
        let hash: [u8; 16] = self.context.clone()
            .finalize()
            .into();
        trace!("validating MD5 hash");
        if hash == self.expected_hash {
            Ok(())
        }
        else {
            Err(ChecksumFailure {
                algorithm: ChecksumAlgorithm::Md5,
                expected: hex::encode(self.expected_hash),
                actual: hex::encode(hash),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use futures::StreamExt;
    use super::*;

    fn chunks(data: &[&'static str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::iter(data.iter().map(|s| Ok(Bytes::from_static(s.as_bytes()))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_valid_body_passes_all_data() {
        let checksum = Checksum::parse(ChecksumAlgorithm::Sha1, "a9993e364706816aba3e25717850c26c9cd0d89d").unwrap();
        let body = ValidatingBody::new(chunks(&["a", "bc"]), vec![validator_for(&checksum)]);
        let collected: Vec<anyhow::Result<Bytes>> = body.collect().await;

        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|c| c.is_ok()));
    }

    #[tokio::test]
    async fn test_valid_md5_body() {
        let checksum = Checksum::parse(ChecksumAlgorithm::Md5, "900150983cd24fb0d6963f7d28e17f72").unwrap();
        let body = ValidatingBody::new(chunks(&["ab", "c"]), vec![validator_for(&checksum)]);
        let collected: Vec<anyhow::Result<Bytes>> = body.collect().await;
        assert!(collected.iter().all(|c| c.is_ok()));
    }

    #[tokio::test]
    async fn test_invalid_body_ends_with_checksum_failure() {
        let checksum = Checksum::parse(ChecksumAlgorithm::Md5, "900150983cd24fb0d6963f7d28e17f72").unwrap();
        let mut body = Box::pin(ValidatingBody::new(chunks(&["ab", "d"]), vec![validator_for(&checksum)]));

        assert!(body.next().await.unwrap().is_ok());
        assert!(body.next().await.unwrap().is_ok());
        let err = body.next().await.unwrap().unwrap_err();
        let failure = err.downcast_ref::<ChecksumFailure>().unwrap();
        assert_eq!(failure.algorithm, ChecksumAlgorithm::Md5);
        assert_eq!(failure.expected, "900150983cd24fb0d6963f7d28e17f72");

        // failed streams stay failed
        assert!(body.next().await.unwrap().is_err());
    }
}
