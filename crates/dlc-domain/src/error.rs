use thiserror::Error;

/// Errores del dominio de control de carga
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validación fallida: {0}")]
    Validation(String),
}
