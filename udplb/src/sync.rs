use std::collections::BTreeMap;

use log::{debug, info, log_enabled, warn, Level};
use udplb_common::{LbKey, LbUpstream};

use crate::config::{Config, Service};
use crate::error::SyncError;
use crate::table::UpstreamTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub services: usize,
    pub records: usize,
    /// Rows checked by the read back, when it ran.
    pub verified: Option<usize>,
}

/// The records of one service, master first, backends in declared order.
pub fn expand(service: &Service) -> Vec<(LbKey, LbUpstream)> {
    let key = service.key();
    let options = service.options();

    let mut records = Vec::with_capacity(service.backends().len() + 1);
    records.push((
        LbKey::master(key.address, key.port),
        LbUpstream::Master {
            count: service.count(),
            tc_action: options.tc_action,
            strategy: options.strategy,
        },
    ));
    for (slave, backend) in (1..=u8::MAX).zip(service.backends()) {
        records.push((
            LbKey::backend(key.address, key.port, slave),
            LbUpstream::Backend {
                address: backend.address,
                port: backend.port,
            },
        ));
    }
    records
}

/// Writes every record of `config`. Stops at the first failed write.
pub fn apply<T>(config: &Config, table: &mut T) -> Result<SyncReport, SyncError>
where
    T: UpstreamTable + ?Sized,
{
    let mut written = 0;
    for service in config.services() {
        for (key, value) in expand(service) {
            table
                .write(&key.encode(), &value.encode())
                .map_err(|source| SyncError::TableWrite {
                    key,
                    written,
                    source,
                })?;
            written += 1;
        }
        debug!(
            "service {}: master and {} backend(s) written",
            service.key(),
            service.count()
        );
    }
    Ok(SyncReport {
        services: config.len(),
        records: written,
        verified: None,
    })
}

/// Decodes every row of the table.
pub fn read_back<T>(table: &T) -> Result<BTreeMap<LbKey, LbUpstream>, SyncError>
where
    T: UpstreamTable + ?Sized,
{
    let mut decoded = BTreeMap::new();
    for (key, value) in table.rows().map_err(SyncError::TableRead)? {
        let lb_key = LbKey::decode(&key).map_err(|source| SyncError::EncodingInvariant {
            row: key.clone(),
            source,
        })?;
        let upstream =
            LbUpstream::decode(&lb_key, &value).map_err(|source| SyncError::EncodingInvariant {
                row: key.clone(),
                source,
            })?;
        decoded.insert(lb_key, upstream);
    }
    Ok(decoded)
}

/// Reads the table back and checks it holds every record of `config`.
///
/// Rows that do not belong to `config` are reported but tolerated.
pub fn verify<T>(config: &Config, table: &T) -> Result<usize, SyncError>
where
    T: UpstreamTable + ?Sized,
{
    let observed = read_back(table)?;
    for (key, value) in &observed {
        debug!("{key} -> {value}");
    }

    let mut checked = 0;
    for service in config.services() {
        for (key, expected) in expand(service) {
            match observed.get(&key) {
                None => return Err(SyncError::Missing { key }),
                Some(found) if *found != expected => {
                    return Err(SyncError::Mismatch {
                        key,
                        expected,
                        found: *found,
                    })
                }
                Some(_) => checked += 1,
            }
        }
    }
    if observed.len() > checked {
        warn!(
            "{} row(s) in the upstream table do not belong to the configuration",
            observed.len() - checked
        );
    }
    Ok(checked)
}

/// Applies `config` and, if asked, verifies the result.
pub fn synchronize<T>(config: &Config, table: &mut T, verify_rows: bool) -> Result<SyncReport, SyncError>
where
    T: UpstreamTable + ?Sized,
{
    let mut report = apply(config, table)?;
    if verify_rows {
        report.verified = Some(verify(config, table)?);
    } else if log_enabled!(Level::Debug) {
        for (key, value) in read_back(table)? {
            debug!("{key} -> {value}");
        }
    }
    info!(
        "upstream table synchronized: {} service(s), {} record(s)",
        report.services, report.records
    );
    Ok(report)
}
