//! Tagged-variant capability inputs (spec.md §9 design note: "inputs are
//! modeled as a small tagged-variant enum rather than a grab-bag struct,
//! so a connector that doesn't support e.g. parking-bay sensing simply
//! never produces that variant").

/// Physical-layer signals the host reports per connector, consumed by
/// `TransactionEngine::apply_input` to evaluate 2.0.1 `TxStartPoint`/
/// `TxStopPoint` control points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineInput {
    EvConnected(bool),
    ParkingBayOccupied(bool),
    PowerPathClosed(bool),
    EnergyTransferActive(bool),
    /// `connectorPlugged` (spec.md §4.1 start condition, FreeVend rising
    /// edge). Absent ⇒ assumed `true`; a connector that never reports
    /// this input is treated as always plugged.
    ConnectorPlugged(bool),
    /// A fatal error condition is asserted/cleared on the connector.
    /// Absent ⇒ assumed `false` (no fault).
    Faulted(bool),
    /// `startTxReady` hardware interlock. Absent ⇒ assumed `true`.
    StartTxReady(bool),
    /// `stopTxReady` hardware interlock. Absent ⇒ assumed `true`.
    StopTxReady(bool),
}

/// Result of an `Authorize.conf` (or a local-list/cache hit), fed back
/// into `TransactionEngine::confirm_authorization`.
#[derive(Debug, Clone)]
pub enum AuthResult {
    Accepted { parent_id_tag: Option<String> },
    Rejected,
    /// No response within `AuthorizationTimeout` (or 1s while offline).
    /// Resolution follows spec.md §4.1 step 6's decision table.
    Timeout,
}
