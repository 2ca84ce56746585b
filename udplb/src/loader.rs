use std::path::Path;

use anyhow::{anyhow, Context};
use aya::maps::{HashMap as BpfHashMap, MapData};
use aya::programs::tc::SchedClassifierLinkId;
use aya::programs::{tc, SchedClassifier, TcAttachType};
use aya::Ebpf;
use aya_log::EbpfLogger;
use log::{debug, info, warn};
use netlink_packet_core::{NLM_F_ACK, NLM_F_REQUEST};
use netlink_packet_route::tc::{TcAttribute, TcHandle, TcMessage};
use netlink_packet_route::RouteNetlinkMessage;
use nix::net::if_::if_nametoindex;
use udplb_common::{KEY_LEN, LAYOUT_VERSION, VALUE_LEN};

use crate::netlink::RouteSocket;

pub type UpstreamMap<'a> = BpfHashMap<&'a mut MapData, [u8; KEY_LEN], [u8; VALUE_LEN]>;

/// A classifier attached to an interface. Detached again by `detach`, or
/// when dropped.
pub struct Attached {
    ebpf: Ebpf,
    program: String,
    iface: String,
    ifindex: u32,
    link: Option<SchedClassifierLinkId>,
    /// The `clsact` qdisc was created by `load` rather than found.
    owns_qdisc: bool,
}

impl Attached {
    pub fn load(object: &Path, program: &str, iface: &str) -> anyhow::Result<Self> {
        let ifindex = if_nametoindex(iface).with_context(|| format!("no interface {iface}"))?;
        let mut ebpf = Ebpf::load_file(object)
            .with_context(|| format!("failed to load {}", object.display()))?;
        if let Err(e) = EbpfLogger::init(&mut ebpf) {
            // This can happen if the object carries no log statements.
            warn!("failed to initialize eBPF logger: {}", e);
        }

        let owns_qdisc = match tc::qdisc_add_clsact(iface) {
            Ok(()) => true,
            Err(e) => {
                // usually EEXIST
                debug!("clsact qdisc on {iface} not added: {e}");
                false
            }
        };
        let classifier: &mut SchedClassifier = ebpf
            .program_mut(program)
            .ok_or_else(|| anyhow!("program {program} not found in {}", object.display()))?
            .try_into()?;
        classifier.load()?;
        let link = classifier
            .attach(iface, TcAttachType::Ingress)
            .with_context(|| format!("failed to attach {program} to {iface} ingress"))?;
        info!("attached {program} to {iface} ingress, upstream layout v{LAYOUT_VERSION}");

        Ok(Self {
            ebpf,
            program: program.to_string(),
            iface: iface.to_string(),
            ifindex,
            link: Some(link),
            owns_qdisc,
        })
    }

    /// The upstream hash map of the loaded object.
    pub fn upstreams(&mut self, name: &str) -> anyhow::Result<UpstreamMap<'_>> {
        let map = self
            .ebpf
            .map_mut(name)
            .ok_or_else(|| anyhow!("map {name} not found"))?;
        BpfHashMap::try_from(map).context("upstream map has an unexpected type or layout")
    }

    pub fn detach(mut self) -> anyhow::Result<()> {
        if let Some(link) = self.link.take() {
            let classifier: &mut SchedClassifier = self
                .ebpf
                .program_mut(&self.program)
                .ok_or_else(|| anyhow!("program {} not found", self.program))?
                .try_into()?;
            classifier.detach(link)?;
            info!("detached {} from {} ingress", self.program, self.iface);
        }
        if self.owns_qdisc {
            RouteSocket::new()?
                .request(
                    NLM_F_REQUEST | NLM_F_ACK,
                    RouteNetlinkMessage::DelQueueDiscipline(clsact_qdisc(self.ifindex)),
                )
                .with_context(|| format!("failed to delete clsact qdisc on {}", self.iface))?;
            self.owns_qdisc = false;
            info!("deleted clsact qdisc on {}", self.iface);
        }
        Ok(())
    }
}

/// The `clsact` qdisc of `ifindex`, as `tc qdisc del dev <iface> clsact`
/// addresses it.
fn clsact_qdisc(ifindex: u32) -> TcMessage {
    let mut msg = TcMessage::default();
    msg.header.index = ifindex as i32;
    msg.header.handle = TcHandle {
        major: 0xffff,
        minor: 0,
    };
    msg.header.parent = TcHandle {
        major: 0xffff,
        minor: 0xfff1,
    };
    msg.attributes.push(TcAttribute::Kind("clsact".to_string()));
    msg
}
