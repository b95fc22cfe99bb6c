//! The selection-request state machine: owns the CLIPBOARD selection and
//! serves conversion requests until ownership is lost and every outstanding
//! transfer has drained.

use std::collections::{HashMap, VecDeque};

use arrayvec::ArrayVec;
use log::{debug, info, trace, warn};
use x11rb::{
    atom_manager,
    connection::{Connection, RequestConnection},
    cookie::{Cookie, VoidCookie},
    errors::{ConnectionError, ReplyError},
    protocol::{
        xproto::{
            Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt, CreateWindowAux, EventMask,
            GetPropertyType, PropMode, Property, SelectionNotifyEvent, SelectionRequestEvent,
            Timestamp, Window, WindowClass, SELECTION_NOTIFY_EVENT,
        },
        Event,
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as WrapperConnExt,
    x11_utils::TryParse,
};

use crate::{
    encoding::{is_icccm_string, is_icccm_utf8_string, to_copied_files, to_uri_list},
    CliError,
};

atom_manager! {
    Atoms:
    AtomsCookie {
        CLIPBOARD,
        ATOM_PAIR,
        INCR,

        TIMESTAMP,
        TARGETS,
        MULTIPLE,
    }
}

/// Optional text targets; absent when the payload fails the relevant ICCCM
/// validator or the intern failed.
#[derive(Default)]
struct TextAtoms {
    text: Option<Atom>,
    string: Option<Atom>,
    utf8_string: Option<Atom>,
    c_string: Option<Atom>,
}

/// File targets, interned in filename mode only.
#[derive(Default)]
struct FileAtoms {
    file_name: Option<Atom>,
    uri_list: Option<Atom>,
    copied_files: ArrayVec<Atom, 4>,
}

#[derive(Copy, Clone, Debug)]
enum Handler {
    Timestamp,
    Targets,
    Multiple,
    /// Payload view typed by the requested target itself.
    PayloadAsIs,
    /// Payload view with a fixed type atom (TEXT resolution, FILE_NAME).
    PayloadTyped(Atom),
    UriList,
    CopiedFiles,
}

/// An owning converted buffer.
struct ConvertedData {
    type_: Atom,
    format: u8,
    bytes: Vec<u8>,
}

/// Where the bytes of an in-flight transfer live. Views are resolved lazily
/// so transfer records never borrow from the server they are stored in.
enum TransferData {
    Owned(ConvertedData),
    /// The payload, typed per the request.
    Payload { type_: Atom },
    /// The 32-bit ownership timestamp.
    Timestamp,
    /// The cache entry for a target.
    Cached(Atom),
}

struct Transfer {
    data: TransferData,
    /// Bytes delivered so far; `None` until the first write.
    transferred: Option<usize>,
}

/// Write-back slot for a MULTIPLE sub-request: the parent's transfer holds
/// the atom-pair buffer, `slot` is the atom index of this pair's property.
#[derive(Copy, Clone)]
struct SubResult {
    parent_property: Atom,
    slot: usize,
}

struct Request {
    id: u64,
    event: SelectionRequestEvent,
    ready: bool,
    on_finish: Option<SubResult>,
}

pub struct Server<'a> {
    conn: RustConnection,
    payload: &'a [u8],
    owner: Window,
    timestamp: Timestamp,
    timestamp_bytes: [u8; 4],
    atoms: Atoms,
    max_transfer_size: usize,
    handlers: HashMap<Atom, Handler>,
    cache: HashMap<Atom, ConvertedData>,
    transfers: HashMap<(Window, Atom), Transfer>,
    req_queues: HashMap<Window, VecDeque<Request>>,
    next_request_id: u64,
}

impl<'a> Server<'a> {
    /// Connects, creates the owner window, interns atoms, derives the
    /// ownership timestamp, and claims the CLIPBOARD selection.
    pub fn bootstrap(payload: &'a [u8], is_file: bool) -> Result<Self, CliError> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn.setup().roots[screen_num].root;
        conn.prefetch_maximum_request_bytes();
        debug!("X11 connection established.");

        let owner = conn.generate_id()?;
        let window_cookie = conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            owner,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::default().event_mask(EventMask::PROPERTY_CHANGE),
        )?;

        let atoms_cookie = Atoms::new(&conn)?;
        let mut pending = ArrayVec::<(&'static [u8], _), 10>::new_const();
        {
            let mut intern = |name: &'static [u8]| -> Result<(), CliError> {
                pending.push((name, conn.intern_atom(false, name)?));
                Ok(())
            };
            intern(b"TEXT")?;
            if is_icccm_string(payload) {
                intern(b"STRING")?;
            }
            if is_icccm_utf8_string(payload) {
                intern(b"UTF8_STRING")?;
            }
            intern(b"C_STRING")?;
            if is_file {
                for name in [
                    b"FILE_NAME" as &[u8],
                    b"text/uri-list",
                    b"x-special/gnome-copied-files",
                    b"x-special/KDE-copied-files",
                    b"x-special/mate-copied-files",
                    b"x-special/nautilus-clipboard",
                ] {
                    intern(name)?;
                }
            }
        }

        // A zero-length change to our own window provokes the PropertyNotify
        // that carries the server time to own the selection at.
        let time_cookie = conn.change_property8(
            PropMode::REPLACE,
            owner,
            AtomEnum::PRIMARY,
            AtomEnum::PRIMARY,
            &[],
        )?;

        window_cookie.check()?;
        let atoms = atoms_cookie.reply()?;
        let mut text = TextAtoms::default();
        let mut file = FileAtoms::default();
        for (name, cookie) in pending {
            let atom = match cookie.reply() {
                Ok(reply) => reply.atom,
                Err(e) => {
                    warn!(
                        "Failed to intern {} atom, omitting target: {e}",
                        String::from_utf8_lossy(name)
                    );
                    continue;
                }
            };
            match name {
                b"TEXT" => text.text = Some(atom),
                b"STRING" => text.string = Some(atom),
                b"UTF8_STRING" => text.utf8_string = Some(atom),
                b"C_STRING" => text.c_string = Some(atom),
                b"FILE_NAME" => file.file_name = Some(atom),
                b"text/uri-list" => file.uri_list = Some(atom),
                _ => file.copied_files.push(atom),
            }
        }
        debug!("Atom internment complete.");

        time_cookie.check()?;
        let timestamp = loop {
            match conn.wait_for_event()? {
                Event::PropertyNotify(event) if event.window == owner => break event.time,
                event => trace!("Ignoring event while awaiting a timestamp: {event:?}"),
            }
        };
        debug!("Ownership timestamp is {timestamp}.");

        conn.set_selection_owner(owner, atoms.CLIPBOARD, timestamp)?
            .check()?;

        // Half the negotiated request size; always a whole number of 32-bit
        // units.
        let max_transfer_size = conn.maximum_request_bytes() / 2;

        let handlers = register_handlers(&atoms, &text, &file);
        info!("Claimed CLIPBOARD with {} targets.", handlers.len());

        Ok(Self {
            conn,
            payload,
            owner,
            timestamp,
            timestamp_bytes: timestamp.to_ne_bytes(),
            atoms,
            max_transfer_size,
            handlers,
            cache: HashMap::new(),
            transfers: HashMap::new(),
            req_queues: HashMap::new(),
            next_request_id: 0,
        })
    }

    /// Serves conversion requests until ownership is lost and all queues
    /// have drained, or the connection breaks.
    pub fn run(&mut self) -> Result<(), CliError> {
        let current = self
            .conn
            .get_selection_owner(self.atoms.CLIPBOARD)?
            .reply()?
            .owner;
        if current != self.owner {
            info!("Lost the CLIPBOARD ownership race to another client.");
            return Ok(());
        }

        info!("Serving CLIPBOARD requests.");
        let mut own = true;
        while own || !self.req_queues.is_empty() {
            let event = match self.conn.wait_for_event() {
                Ok(event) => event,
                Err(e) => {
                    warn!("X11 connection broken: {e}");
                    return Ok(());
                }
            };
            match event {
                Event::SelectionRequest(event) => {
                    trace!(
                        "Conversion request from requestor {} for target {}.",
                        event.requestor,
                        event.target
                    );
                    let id = self.next_id();
                    self.req_queues
                        .entry(event.requestor)
                        .or_default()
                        .push_back(Request {
                            id,
                            event,
                            ready: true,
                            on_finish: None,
                        });
                }
                Event::SelectionClear(event) => {
                    if event.selection == self.atoms.CLIPBOARD {
                        info!("Lost CLIPBOARD ownership, draining outstanding requests.");
                        own = false;
                    }
                }
                Event::PropertyNotify(event) if event.state == Property::DELETE => {
                    if let Some(head) = self
                        .req_queues
                        .get_mut(&event.window)
                        .and_then(VecDeque::front_mut)
                    {
                        if head.event.property == event.atom {
                            trace!("Requestor {} consumed the previous chunk.", event.window);
                            head.ready = true;
                        }
                    }
                }
                Event::Error(e) => {
                    warn!("X11 error event, shutting down: {e:?}");
                    return Ok(());
                }
                event => trace!("Ignoring X11 event: {event:?}"),
            }

            // Drive every ready head to quiescence. A MULTIPLE splices its
            // sub-requests ahead of itself mid-turn, so one pass is not
            // enough; INCR waits park their head with `ready == false`.
            loop {
                let ready = self
                    .req_queues
                    .iter()
                    .filter(|(_, queue)| queue.front().is_some_and(|head| head.ready))
                    .map(|(&window, _)| window)
                    .collect::<Vec<_>>();
                if ready.is_empty() {
                    break;
                }
                for window in ready {
                    self.process_head(window);
                }
            }
            self.req_queues.retain(|_, queue| !queue.is_empty());
        }
        info!("Ownership lost and queues drained, exiting.");
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Classifies the head request of a requestor's queue and hands it to
    /// its target's handler, refusing anything stale, misdirected, or
    /// unsupported.
    fn process_head(&mut self, requestor: Window) {
        let Some(head) = self.req_queues.get(&requestor).and_then(VecDeque::front) else {
            return;
        };
        if !head.ready {
            return;
        }
        let (id, mut event) = (head.id, head.event);

        let stale = event.time != x11rb::CURRENT_TIME && event.time < self.timestamp;
        if event.owner != self.owner || stale || event.selection != self.atoms.CLIPBOARD {
            debug!("Refusing stale or misdirected request from requestor {requestor}.");
            event.property = x11rb::NONE;
            self.finish(event, true);
            return;
        }
        let Some(&handler) = self.handlers.get(&event.target) else {
            debug!(
                "Refusing unsupported target {} from requestor {requestor}.",
                event.target
            );
            event.property = x11rb::NONE;
            self.finish(event, true);
            return;
        };

        if matches!(handler, Handler::Multiple) {
            if event.property == x11rb::NONE {
                debug!("Refusing MULTIPLE request without a parameter property.");
                self.finish(event, true);
                return;
            }
        } else if event.property == x11rb::NONE {
            // Obsolete clients leave the property unset; ICCCM says to reply
            // into the target atom then.
            event.property = event.target;
        }
        self.proceed(id, event, handler);
    }

    /// Ensures a transfer exists for the request's destination, then drives
    /// it unless MULTIPLE spliced sub-requests ahead of the request.
    fn proceed(&mut self, id: u64, mut event: SelectionRequestEvent, handler: Handler) {
        let key = (event.requestor, event.property);
        if !self.transfers.contains_key(&key) {
            let Some(data) = self.convert(&event, handler) else {
                event.property = x11rb::NONE;
                self.finish(event, true);
                return;
            };
            self.transfers.insert(
                key,
                Transfer {
                    data,
                    transferred: None,
                },
            );
        }

        // Sub-requests run first; the parent is revisited once they drain.
        let head_id = self
            .req_queues
            .get(&event.requestor)
            .and_then(VecDeque::front)
            .map(|head| head.id);
        if head_id != Some(id) {
            return;
        }

        match self.transfer(&event) {
            None => {
                // The requestor is unreachable or the write failed; drop the
                // transfer without a notification.
                event.property = x11rb::NONE;
                self.transfers.remove(&key);
                self.finish(event, false);
            }
            Some(true) => {
                let single_shot = self.transfers[&key]
                    .transferred
                    .is_some_and(|n| n <= self.max_transfer_size);
                self.transfers.remove(&key);
                self.finish(event, single_shot);
            }
            Some(false) => {
                if let Some(head) = self
                    .req_queues
                    .get_mut(&event.requestor)
                    .and_then(VecDeque::front_mut)
                {
                    head.ready = false;
                    head.event = event;
                }
            }
        }
    }

    /// Produces the transfer data for a request, populating the cache for
    /// cache-enabled targets. `None` refuses the request.
    fn convert(&mut self, event: &SelectionRequestEvent, handler: Handler) -> Option<TransferData> {
        match handler {
            Handler::Timestamp => Some(TransferData::Timestamp),
            Handler::Targets => {
                if !self.cache.contains_key(&event.target) {
                    let bytes = sorted_target_bytes(self.handlers.keys().copied());
                    self.cache.insert(
                        event.target,
                        ConvertedData {
                            type_: AtomEnum::ATOM.into(),
                            format: 32,
                            bytes,
                        },
                    );
                }
                Some(TransferData::Cached(event.target))
            }
            Handler::PayloadAsIs => Some(TransferData::Payload {
                type_: event.target,
            }),
            Handler::PayloadTyped(type_) => Some(TransferData::Payload { type_ }),
            Handler::UriList => {
                if !self.cache.contains_key(&event.target) {
                    let bytes = to_uri_list(self.payload);
                    self.cache.insert(
                        event.target,
                        ConvertedData {
                            type_: event.target,
                            format: 8,
                            bytes,
                        },
                    );
                }
                Some(TransferData::Cached(event.target))
            }
            Handler::CopiedFiles => {
                if !self.cache.contains_key(&event.target) {
                    let bytes = to_copied_files(self.payload);
                    self.cache.insert(
                        event.target,
                        ConvertedData {
                            type_: event.target,
                            format: 8,
                            bytes,
                        },
                    );
                }
                Some(TransferData::Cached(event.target))
            }
            Handler::Multiple => self.convert_multiple(event).map(TransferData::Owned),
        }
    }

    /// Reads the requestor's ATOM_PAIR property and splices one sub-request
    /// per valid pair ahead of the parent. The returned buffer doubles as
    /// the result list written back to the requestor: sub-request failures
    /// clear their pair's property slot in place.
    fn convert_multiple(&mut self, event: &SelectionRequestEvent) -> Option<ConvertedData> {
        // Type discovery first; a zero-length fetch reports the true size.
        let info = self.await_reply(
            self.conn.get_property(
                false,
                event.requestor,
                event.property,
                GetPropertyType::ANY,
                0,
                0,
            ),
            "Failed to inspect MULTIPLE parameter property",
        )?;
        if !valid_atom_pair_property(info.format, info.type_, self.atoms.ATOM_PAIR, info.bytes_after)
        {
            debug!(
                "Malformed MULTIPLE parameter property from requestor {}: format {}, type {}, {} bytes.",
                event.requestor, info.format, info.type_, info.bytes_after
            );
            return None;
        }

        let reply = self.await_reply(
            self.conn.get_property(
                false,
                event.requestor,
                event.property,
                info.type_,
                0,
                info.bytes_after / 4,
            ),
            "Failed to read MULTIPLE parameter property",
        )?;
        let mut pairs = reply.value32()?.collect::<Vec<_>>();
        debug!(
            "MULTIPLE request with {} conversions from requestor {}.",
            pairs.len() / 2,
            event.requestor
        );

        // Splice in reverse so sub-requests execute in pair order. Pairs
        // without a property, and pairs that would re-enter an in-flight
        // transfer of this very target, fail up front.
        for index in (0..pairs.len() / 2).rev() {
            let (target, property) = (pairs[2 * index], pairs[2 * index + 1]);
            if property == x11rb::NONE {
                continue;
            }
            if target == event.target
                && self.transfers.contains_key(&(event.requestor, property))
            {
                debug!("Conversion loop detected on property {property}, refusing pair.");
                pairs[2 * index + 1] = x11rb::NONE;
                continue;
            }
            let mut sub = *event;
            sub.target = target;
            sub.property = property;
            let id = self.next_id();
            self.req_queues
                .entry(event.requestor)
                .or_default()
                .push_front(Request {
                    id,
                    event: sub,
                    ready: true,
                    on_finish: Some(SubResult {
                        parent_property: event.property,
                        slot: 2 * index + 1,
                    }),
                });
        }

        Some(ConvertedData {
            type_: self.atoms.ATOM_PAIR,
            format: 32,
            bytes: pairs.iter().flat_map(|atom| atom.to_ne_bytes()).collect(),
        })
    }

    /// Writes the transfer for the request's destination: in one shot when
    /// it fits, otherwise as INCR rounds driven by the requestor deleting
    /// the property. `Some(true)` finished, `Some(false)` awaits the next
    /// PropertyNotify, `None` is fatal for this request.
    fn transfer(&mut self, event: &SelectionRequestEvent) -> Option<bool> {
        let key = (event.requestor, event.property);
        let Transfer { data, transferred } = self.transfers.get(&key)?;
        let transferred = *transferred;
        let (type_, format, bytes) = self.view(data);
        let size = bytes.len();
        let unit = usize::from(format / 8);

        let Some(done) = transferred else {
            if size <= self.max_transfer_size {
                if !self.check_request(
                    self.conn.change_property(
                        PropMode::REPLACE,
                        event.requestor,
                        event.property,
                        type_,
                        format,
                        u32::try_from(size / unit).unwrap(),
                        bytes,
                    ),
                    "Failed to write selection property",
                ) {
                    return None;
                }
                if let Some(transfer) = self.transfers.get_mut(&key) {
                    transfer.transferred = Some(size);
                }
                return Some(true);
            }

            debug!(
                "Starting INCR transfer of {size} bytes to requestor {}.",
                event.requestor
            );
            let subscribed = self.check_request(
                self.conn.change_window_attributes(
                    event.requestor,
                    &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
                ),
                "Failed to subscribe to requestor property changes",
            );
            let started = self.check_request(
                self.conn.change_property32(
                    PropMode::REPLACE,
                    event.requestor,
                    event.property,
                    self.atoms.INCR,
                    &[incr_size_hint(size)],
                ),
                "Failed to start INCR transfer",
            );
            // ICCCM wants the notification at INCR start, not at the end.
            if !subscribed || !started || !self.send_notify(event) {
                return None;
            }
            if let Some(transfer) = self.transfers.get_mut(&key) {
                transfer.transferred = Some(0);
            }
            return Some(false);
        };

        // Next round; the zero-length replacement after the last chunk
        // signals INCR end.
        let chunk = next_chunk(size, done, self.max_transfer_size, format);
        if !self.check_request(
            self.conn.change_property(
                PropMode::REPLACE,
                event.requestor,
                event.property,
                type_,
                format,
                u32::try_from(chunk / unit).unwrap(),
                &bytes[done..done + chunk],
            ),
            "Failed to write INCR chunk",
        ) {
            return None;
        }
        trace!(
            "Wrote {chunk} byte INCR chunk to requestor {} at offset {done}.",
            event.requestor
        );
        if let Some(transfer) = self.transfers.get_mut(&key) {
            transfer.transferred = Some(done + chunk);
        }
        if done < size {
            return Some(false);
        }

        // Best effort; the requestor may be gone already or have other
        // watchers racing on its mask.
        self.check_request(
            self.conn.change_window_attributes(
                event.requestor,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::NO_EVENT),
            ),
            "Failed to restore requestor event mask",
        );
        debug!("INCR transfer to requestor {} finished.", event.requestor);
        Some(true)
    }

    fn view<'b>(&'b self, data: &'b TransferData) -> (Atom, u8, &'b [u8]) {
        match data {
            TransferData::Owned(ConvertedData {
                type_,
                format,
                bytes,
            }) => (*type_, *format, bytes.as_slice()),
            TransferData::Payload { type_ } => (*type_, 8, self.payload),
            TransferData::Timestamp => (AtomEnum::INTEGER.into(), 32, &self.timestamp_bytes),
            TransferData::Cached(target) => {
                let ConvertedData {
                    type_,
                    format,
                    bytes,
                } = &self.cache[target];
                (*type_, *format, bytes.as_slice())
            }
        }
    }

    /// Completes the head request of the event's requestor: records a
    /// sub-request's outcome in its parent's atom-pair buffer, or notifies
    /// the requestor.
    fn finish(&mut self, event: SelectionRequestEvent, send_notification: bool) {
        let Some(head) = self
            .req_queues
            .get_mut(&event.requestor)
            .and_then(VecDeque::pop_front)
        else {
            return;
        };
        if let Some(SubResult {
            parent_property,
            slot,
        }) = head.on_finish
        {
            if event.property == x11rb::NONE {
                if let Some(Transfer {
                    data: TransferData::Owned(parent),
                    ..
                }) = self.transfers.get_mut(&(event.requestor, parent_property))
                {
                    let offset = slot * 4;
                    if let Some(chunk) = parent.bytes.get_mut(offset..offset + 4) {
                        chunk.copy_from_slice(&x11rb::NONE.to_ne_bytes());
                    }
                }
            }
        } else if send_notification {
            self.send_notify(&event);
        }
    }

    fn send_notify(&self, event: &SelectionRequestEvent) -> bool {
        self.check_request(
            self.conn.send_event(
                false,
                event.requestor,
                EventMask::NO_EVENT,
                SelectionNotifyEvent {
                    response_type: SELECTION_NOTIFY_EVENT,
                    sequence: event.sequence,
                    time: event.time,
                    requestor: event.requestor,
                    selection: event.selection,
                    target: event.target,
                    property: event.property,
                },
            ),
            "Failed to send selection notification",
        )
    }

    /// Awaits a void request, logging instead of propagating: a failure
    /// only refuses the request being served.
    fn check_request(
        &self,
        cookie: Result<VoidCookie<'_, RustConnection>, ConnectionError>,
        what: &str,
    ) -> bool {
        match cookie.map_err(ReplyError::from).and_then(VoidCookie::check) {
            Ok(()) => true,
            Err(e) => {
                warn!("{what}: {e}");
                false
            }
        }
    }

    /// Awaits a reply, logging and returning `None` on failure.
    fn await_reply<R: TryParse>(
        &self,
        cookie: Result<Cookie<'_, RustConnection, R>, ConnectionError>,
        what: &str,
    ) -> Option<R> {
        match cookie.map_err(ReplyError::from).and_then(Cookie::reply) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!("{what}: {e}");
                None
            }
        }
    }
}

/// Builds the target registry. Its key set is exactly the advertised
/// TARGETS list.
fn register_handlers(atoms: &Atoms, text: &TextAtoms, file: &FileAtoms) -> HashMap<Atom, Handler> {
    let mut handlers = HashMap::new();
    handlers.insert(atoms.TIMESTAMP, Handler::Timestamp);
    handlers.insert(atoms.TARGETS, Handler::Targets);
    handlers.insert(atoms.MULTIPLE, Handler::Multiple);

    for atom in [text.c_string, text.string, text.utf8_string]
        .into_iter()
        .flatten()
    {
        handlers.insert(atom, Handler::PayloadAsIs);
    }
    // TEXT promises "text in a convenient encoding": the best concrete text
    // atom stands in as the reply type.
    if let (Some(text_atom), Some(type_)) = (
        text.text,
        text.utf8_string.or(text.string).or(text.c_string),
    ) {
        handlers.insert(text_atom, Handler::PayloadTyped(type_));
    }
    // File names are plain byte strings.
    if let (Some(file_name), Some(c_string)) = (file.file_name, text.c_string) {
        handlers.insert(file_name, Handler::PayloadTyped(c_string));
    }
    if let Some(uri_list) = file.uri_list {
        handlers.insert(uri_list, Handler::UriList);
    }
    for &atom in &file.copied_files {
        handlers.insert(atom, Handler::CopiedFiles);
    }
    handlers
}

/// TARGETS reply body: the advertised atoms in ascending order.
fn sorted_target_bytes(targets: impl Iterator<Item = Atom>) -> Vec<u8> {
    let mut targets = targets.collect::<Vec<_>>();
    targets.sort_unstable();
    targets
        .iter()
        .flat_map(|atom| atom.to_ne_bytes())
        .collect()
}

fn valid_atom_pair_property(format: u8, type_: Atom, atom_pair: Atom, size: u32) -> bool {
    format == 32 && type_ == atom_pair && size % 8 == 0
}

/// The INCR size hint is a single 32-bit word; larger payloads are
/// under-reported at `u32::MAX` per the protocol's field width.
fn incr_size_hint(size: usize) -> u32 {
    u32::try_from(size).unwrap_or(u32::MAX)
}

/// Size of the next INCR round, clipped to the transfer bound and rounded
/// down to whole format units.
fn next_chunk(size: usize, done: usize, max_transfer_size: usize, format: u8) -> usize {
    let chunk = max_transfer_size.min(size - done);
    chunk - chunk % usize::from(format / 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_walk_the_buffer_in_order() {
        // 26 bytes at a 16-byte bound: one full chunk, the remainder, then
        // the zero-length terminator.
        let (size, max) = (26, 16);
        let mut done = 0;
        let mut chunks = Vec::new();
        loop {
            let chunk = next_chunk(size, done, max, 8);
            chunks.push(chunk);
            let finished = done >= size;
            done += chunk;
            if finished {
                break;
            }
        }
        assert_eq!(chunks, [16, 10, 0]);
    }

    #[test]
    fn boundary_payloads_fit_in_one_shot() {
        assert_eq!(next_chunk(16, 0, 16, 8), 16);
        assert_eq!(next_chunk(0, 0, 16, 8), 0);
    }

    #[test]
    fn chunks_respect_format_units() {
        assert_eq!(next_chunk(40, 0, 14, 32), 12);
        assert_eq!(next_chunk(40, 36, 16, 32), 4);
        assert_eq!(next_chunk(10, 0, 7, 16), 6);
    }

    #[test]
    fn size_hint_clamps_to_a_word() {
        assert_eq!(incr_size_hint(26), 26);
        assert_eq!(incr_size_hint(usize::MAX), u32::MAX);
    }

    #[test]
    fn targets_are_sorted_ascending() {
        let bytes = sorted_target_bytes([7, 3, 260, 1].into_iter());
        let atoms = bytes
            .chunks_exact(4)
            .map(|chunk| Atom::from_ne_bytes(chunk.try_into().unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(atoms, [1, 3, 7, 260]);
    }

    #[test]
    fn atom_pair_properties_are_validated() {
        let atom_pair = 99;
        assert!(valid_atom_pair_property(32, atom_pair, atom_pair, 16));
        assert!(valid_atom_pair_property(32, atom_pair, atom_pair, 0));
        // Wrong element width, wrong type, and a half pair.
        assert!(!valid_atom_pair_property(8, atom_pair, atom_pair, 16));
        assert!(!valid_atom_pair_property(32, 98, atom_pair, 16));
        assert!(!valid_atom_pair_property(32, atom_pair, atom_pair, 12));
    }
}
