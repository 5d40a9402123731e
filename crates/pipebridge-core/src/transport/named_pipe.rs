//! Windows named-pipe listener and dialer.

use interprocess::local_socket::tokio::{Listener, prelude::*};
use interprocess::local_socket::{GenericFilePath, ListenerOptions, ToFsName};
use interprocess::os::windows::local_socket::ListenerOptionsExt;
use interprocess::os::windows::security_descriptor::SecurityDescriptor;
use tokio::net::windows::named_pipe::ClientOptions;
use tracing::info;
use widestring::U16CString;

use crate::endpoint::{Endpoint, EndpointKind};
use crate::error::{Error, Result};

/// Listening named pipe. Every instance carries `descriptor` as its DACL.
pub struct NamedPipeListener {
    name: String,
    inner: Listener,
}

impl NamedPipeListener {
    /// `descriptor` is an SDDL string with the identity already substituted.
    pub fn bind(name: String, descriptor: &str) -> Result<Self> {
        let security = security_descriptor(descriptor)?;
        let pipe_name = name
            .as_str()
            .to_fs_name::<GenericFilePath>()
            .map_err(|e| Error::Address(format!("{name}: {e}")))?;
        let inner = ListenerOptions::new()
            .name(pipe_name)
            .security_descriptor(security)
            .create_tokio()
            .map_err(|e| Error::Setup(format!("Failed to listen on {name}: {e}")))?;
        info!(pipe = %name, descriptor, "Listening on named pipe");
        Ok(Self { name, inner })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn accept(&mut self) -> std::io::Result<Endpoint> {
        let stream = self.inner.accept().await?;
        Ok(Endpoint::from_stream(EndpointKind::NamedPipe, stream))
    }
}

impl std::fmt::Debug for NamedPipeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedPipeListener")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Parse an SDDL string into a descriptor the pipe can be created with.
pub fn security_descriptor(sddl: &str) -> Result<SecurityDescriptor> {
    let wide = U16CString::from_str(sddl)
        .map_err(|e| Error::Config(format!("Invalid security descriptor {sddl:?}: {e}")))?;
    SecurityDescriptor::deserialize(&wide)
        .map_err(|e| Error::Config(format!("Invalid security descriptor {sddl:?}: {e}")))
}

/// Open a client connection to `name`. A busy pipe surfaces as an error so
/// the caller's retry loop handles it.
pub fn dial(name: &str) -> std::io::Result<Endpoint> {
    let client = ClientOptions::new().open(name)?;
    Ok(Endpoint::from_stream(EndpointKind::NamedPipe, client))
}
