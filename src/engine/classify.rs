/// Engine-agnostic reading of a failed CLI invocation. Docker and Podman word
/// the same conditions differently, so each kind matches both phrasings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    DaemonUnreachable,
    PermissionDenied,
    NoSuchContainer,
    NoSuchImage,
    NameInUse,
    ImageInUse,
    NotRunning,
    Other,
}

impl Failure {
    pub fn is_transport(self) -> bool {
        matches!(self, Failure::DaemonUnreachable | Failure::PermissionDenied)
    }
}

pub fn classify(stderr: &str) -> Failure {
    let lower = stderr.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("failed to connect to the docker api")
        || lower.contains("error during connect")
        || lower.contains("unable to connect to podman")
        || lower.contains("cannot connect to podman")
        || lower.contains("connection refused")
        || (lower.contains("no such file or directory") && lower.contains(".sock"))
    {
        return Failure::DaemonUnreachable;
    }

    if lower.contains("permission denied while trying to connect")
        || lower.contains("got permission denied")
        || (lower.contains("permission denied") && lower.contains("sock"))
    {
        return Failure::PermissionDenied;
    }

    if lower.contains("is already in use") {
        return Failure::NameInUse;
    }

    if lower.contains("image is being used")
        || lower.contains("image used by")
        || lower.contains("unable to delete")
        || lower.contains("image is in use")
        || lower.contains("unable to remove repository reference")
    {
        return Failure::ImageInUse;
    }

    if lower.contains("is not running") || lower.contains("container state improper") {
        return Failure::NotRunning;
    }

    if lower.contains("no such container")
        || lower.contains("no container with name or id")
    {
        return Failure::NoSuchContainer;
    }

    if lower.contains("no such image")
        || lower.contains("unable to find image")
        || lower.contains("image not known")
        || lower.contains("manifest unknown")
        || lower.contains("pull access denied")
        || lower.contains("requested access to the resource is denied")
        || lower.contains("repository does not exist")
        || lower.contains("not found: manifest")
        || lower.contains("invalid reference format")
    {
        return Failure::NoSuchImage;
    }

    Failure::Other
}
