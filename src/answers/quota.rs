use crate::{config::ProctorConfig, error::QuotaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub max_images_per_answer: usize,
    pub max_image_bytes: u64,
    pub max_session_bytes: u64,
}

impl From<&ProctorConfig> for QuotaLimits {
    fn from(config: &ProctorConfig) -> Self {
        Self {
            max_images_per_answer: config.max_images_per_answer,
            max_image_bytes: config.max_image_bytes(),
            max_session_bytes: config.max_session_upload_bytes(),
        }
    }
}

/// Bytes held back for an upload that has not completed yet.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    bytes: u64,
}

impl Reservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Session-scoped upload allowance. Lives in memory only and starts from zero
/// whenever a session is started or resumed.
#[derive(Debug)]
pub struct UploadQuota {
    limits: QuotaLimits,
    uploaded_bytes: u64,
    reserved_bytes: u64,
}

impl UploadQuota {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            uploaded_bytes: 0,
            reserved_bytes: 0,
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.limits
            .max_session_bytes
            .saturating_sub(self.uploaded_bytes + self.reserved_bytes)
    }

    /// Checks count, per-image size and cumulative size in that order and
    /// holds back `size` bytes on success.
    pub fn reserve(&mut self, images_on_answer: usize, size: u64) -> Result<Reservation, QuotaError> {
        if images_on_answer >= self.limits.max_images_per_answer {
            return Err(QuotaError::TooManyImages {
                max: self.limits.max_images_per_answer,
            });
        }

        if size > self.limits.max_image_bytes {
            return Err(QuotaError::ImageTooLarge {
                size_kb: (size + 512) / 1024,
                max_kb: self.limits.max_image_bytes / 1024,
            });
        }

        let committed = self.uploaded_bytes + self.reserved_bytes;
        if committed + size > self.limits.max_session_bytes {
            return Err(QuotaError::SessionLimitReached {
                max_kb: self.limits.max_session_bytes / 1024,
                remaining_kb: self.remaining_bytes() / 1024,
            });
        }

        self.reserved_bytes += size;
        Ok(Reservation { bytes: size })
    }

    pub fn commit(&mut self, reservation: Reservation) {
        self.reserved_bytes = self.reserved_bytes.saturating_sub(reservation.bytes);
        self.uploaded_bytes += reservation.bytes;
    }

    pub fn release(&mut self, reservation: Reservation) {
        self.reserved_bytes = self.reserved_bytes.saturating_sub(reservation.bytes);
    }
}
