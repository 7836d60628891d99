use thiserror::Error;

/// Статус ошибки из PDU ответа (RFC 3416)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    AuthorizationError,
    NotWritable,
    InconsistentName,
    Other(u32),
}

impl ErrorStatus {
    /// `None` для `noError`
    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => return None,
            1 => ErrorStatus::TooBig,
            2 => ErrorStatus::NoSuchName,
            3 => ErrorStatus::BadValue,
            4 => ErrorStatus::ReadOnly,
            5 => ErrorStatus::GenErr,
            6 => ErrorStatus::NoAccess,
            7 => ErrorStatus::WrongType,
            8 => ErrorStatus::WrongLength,
            9 => ErrorStatus::WrongEncoding,
            10 => ErrorStatus::WrongValue,
            11 => ErrorStatus::NoCreation,
            12 => ErrorStatus::InconsistentValue,
            13 => ErrorStatus::ResourceUnavailable,
            14 => ErrorStatus::CommitFailed,
            15 => ErrorStatus::UndoFailed,
            16 => ErrorStatus::AuthorizationError,
            17 => ErrorStatus::NotWritable,
            18 => ErrorStatus::InconsistentName,
            other => ErrorStatus::Other(other),
        };
        Some(status)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            ErrorStatus::NoAccess
                | ErrorStatus::NotWritable
                | ErrorStatus::AuthorizationError
                | ErrorStatus::ReadOnly
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum SnmpError {
    #[error("SNMP таймаут после {attempts} попыток: {oid}")]
    Timeout { oid: String, attempts: u32 },

    #[error("noSuchObject: {0}")]
    NoSuchObject(String),

    #[error("noSuchInstance: {0}")]
    NoSuchInstance(String),

    #[error("endOfMibView: {0}")]
    EndOfMibView(String),

    #[error("доступ запрещён ({status:?}): {oid}")]
    PermissionDenied { oid: String, status: ErrorStatus },

    #[error("SNMP ошибка {status:?}: {oid}")]
    Status { oid: String, status: ErrorStatus },

    #[error("некорректный SNMP ответ: {0}")]
    Malformed(String),

    #[error("ошибка транспорта SNMP: {0}")]
    Transport(String),

    #[error("невалидный OID: {0}")]
    InvalidOid(String),

    #[error("SNMP запрос отменён")]
    Cancelled,
}

impl SnmpError {
    /// Ошибки, после которых имеет смысл повторить запрос
    pub fn is_transient(&self) -> bool {
        matches!(self, SnmpError::Transport(_))
    }

    /// Авторитетный ответ агента об отсутствии объекта
    pub fn is_absent(&self) -> bool {
        matches!(self, SnmpError::NoSuchObject(_) | SnmpError::NoSuchInstance(_))
    }

    /// Сеть/агент недоступны (таймаут или исчерпанные повторы транспорта)
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SnmpError::Timeout { .. } | SnmpError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, SnmpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes() {
        assert_eq!(ErrorStatus::from_code(0), None);
        assert_eq!(ErrorStatus::from_code(5), Some(ErrorStatus::GenErr));
        assert_eq!(ErrorStatus::from_code(3), Some(ErrorStatus::BadValue));
        assert_eq!(ErrorStatus::from_code(42), Some(ErrorStatus::Other(42)));
    }

    #[test]
    fn permission_statuses() {
        assert!(ErrorStatus::NotWritable.is_permission_denied());
        assert!(ErrorStatus::NoAccess.is_permission_denied());
        assert!(!ErrorStatus::GenErr.is_permission_denied());
    }
}
