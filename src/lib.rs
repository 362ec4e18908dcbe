#![doc = include_str!("../README.md")]

pub mod crypto;
pub mod disposition;
pub mod mdn;
pub mod message;
pub mod mic;
pub mod partnership;
pub mod processor;
pub mod resend;
pub mod sender;
pub mod session;
pub mod storage;
pub mod transport;

#[doc(inline)]
pub use message::{Mdn, Message, Payload};

#[doc(inline)]
pub use partnership::{Partnership, PartnershipNotFound, PartnershipStore};

#[doc(inline)]
pub use disposition::{DispositionError, DispositionOutcome, DispositionType};

#[doc(inline)]
pub use mic::{DigestAlgorithm, Mic, MicFormatError};

#[doc(inline)]
pub use processor::{ActiveModule, Module, ModuleError, Processor, ProcessorError};

#[doc(inline)]
pub use resend::{ResendError, ResendItem, ResendQueue};

#[doc(inline)]
pub use sender::As2Sender;

#[doc(inline)]
pub use session::Session;

#[doc(inline)]
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError};

#[doc(inline)]
pub use crypto::{CryptoError, CryptoProvider};
