//! Windows backend: MMDevice topology traversal, device-container lookup,
//! SDP inquiry over Winsock and the device-change broadcast window.

use std::{
   ffi::c_void,
   mem,
   pin::Pin,
   sync::{Arc, OnceLock},
   task::{Context, Poll},
   thread,
};

use futures::{Stream, channel::mpsc};
use log::{debug, warn};
use smol_str::SmolStr;
use uuid::Uuid;
use windows::{
   Devices::Enumeration::{
      DeviceInformation, DeviceInformationKind, DeviceInformationUpdate,
      DeviceWatcher as AepWatcher,
   },
   Foundation::{Collections::IIterable, IPropertyValue, TypedEventHandler},
   Win32::{
      Devices::Bluetooth::GUID_BTHPORT_DEVICE_INTERFACE,
      Devices::FunctionDiscovery::{PKEY_Device_ContainerId, PKEY_Device_FriendlyName},
      Foundation::{HWND, LPARAM, LRESULT, WPARAM},
      Media::Audio::{
         DEVICE_STATE, IConnector, IDeviceTopology, IMMDevice, IMMDeviceEnumerator, IPart,
         MMDeviceEnumerator, eRender,
      },
      Media::KernelStreaming::{
         IKsControl, KSIDENTIFIER, KSIDENTIFIER_0, KSIDENTIFIER_0_0,
         KSPROPERTY_TYPE_BASICSUPPORT, KSPROPERTY_TYPE_GET,
      },
      Networking::WinSock::{
         LUP_FLUSHCACHE, LUP_RETURN_BLOB, NS_BTH, WSADATA, WSAEFAULT, WSAGetLastError,
         WSALookupServiceBeginW, WSALookupServiceEnd, WSALookupServiceNextW, WSAQUERYSETW,
         WSAStartup, WSA_E_NO_MORE,
      },
      System::Com::{
         CLSCTX_ALL, COINIT_MULTITHREADED, CoCreateInstance, CoInitializeEx, CoUninitialize,
         STGM_READ,
      },
      System::LibraryLoader::GetModuleHandleW,
      UI::WindowsAndMessaging::{
         CreateWindowExW, DEV_BROADCAST_DEVICEINTERFACE_W, DEV_BROADCAST_HDR,
         DEVICE_NOTIFY_WINDOW_HANDLE, DefWindowProcW, DispatchMessageW, GetMessageW,
         HWND_MESSAGE, MSG, RegisterClassW, RegisterDeviceNotificationW, WINDOW_EX_STYLE,
         WINDOW_STYLE, WM_DEVICECHANGE, WNDCLASSW,
      },
   },
   core::{GUID, HSTRING, Interface, PCWSTR, w},
};

use crate::{
   address::Address,
   audio::{ContainerId, ControlHandle, EndpointState, OneshotCommand, OneshotControl},
   error::{BlueTrayError, Result},
   platform::{AudioTopology, ContainerSource, EndpointDesc, SdpSource},
   probe::{AttemptStatus, probe_then_fetch},
   watch::{WatchDelta, registry},
};

/// Bluetooth audio one-shot property set on transport filter nodes.
const KSPROPSETID_BTAUDIO: GUID = GUID::from_u128(0x7fa06c40_b8f6_4c7e_8556_e8c33a12e54d);
const KSPROPERTY_ONESHOT_RECONNECT: u32 = 0;
const KSPROPERTY_ONESHOT_DISCONNECT: u32 = 1;

/// L2CAP protocol UUID used as the SDP lookup service class.
const L2CAP_PROTOCOL: GUID = GUID::from_u128(0x00000100_0000_1000_8000_00805f9b34fb);

/// AQS protocol id selecting Bluetooth association endpoints.
const AEP_BLUETOOTH_FILTER: &str =
   "System.Devices.Aep.ProtocolId:=\"{e0cbf06c-cd8b-4647-bb8a-263b43f0f974}\"";

const SDP_PROBE_SIZE: usize = 2048;

fn api_err(op: &'static str, e: windows::core::Error) -> BlueTrayError {
   BlueTrayError::SystemApi {
      op,
      code: e.code().0,
   }
}

/// Per-call COM apartment guard; discovery runs on blocking-pool threads
/// whose apartment state is not otherwise managed.
struct ComGuard;

impl ComGuard {
   fn new() -> Self {
      // RPC_E_CHANGED_MODE means the thread is already initialized; every
      // other outcome still pairs with the CoUninitialize in Drop.
      let _ = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
      Self
   }
}

impl Drop for ComGuard {
   fn drop(&mut self) {
      unsafe { CoUninitialize() };
   }
}

pub struct WindowsPlatform;

impl WindowsPlatform {
   pub fn new() -> Result<Self> {
      let mut wsa_data = WSADATA::default();
      let rc = unsafe { WSAStartup(0x0202, &mut wsa_data) };
      if rc != 0 {
         return Err(BlueTrayError::SystemApi {
            op: "WSAStartup",
            code: rc,
         });
      }
      Ok(Self)
   }

   fn enumerator() -> Result<IMMDeviceEnumerator> {
      unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
         .map_err(|e| api_err("CoCreateInstance", e))
   }

   fn device_by_path(enumerator: &IMMDeviceEnumerator, path: &str) -> Result<IMMDevice> {
      let wide: Vec<u16> = path.encode_utf16().chain(Some(0)).collect();
      unsafe { enumerator.GetDevice(PCWSTR(wide.as_ptr())) }
         .map_err(|e| api_err("GetDevice", e))
   }
}

impl AudioTopology for WindowsPlatform {
   fn render_endpoints(&self) -> Result<Vec<EndpointDesc>> {
      let _com = ComGuard::new();
      let enumerator = Self::enumerator()?;

      let collection = unsafe { enumerator.EnumAudioEndpoints(eRender, DEVICE_STATE(0xf)) }
         .map_err(|e| api_err("EnumAudioEndpoints", e))?;
      let count = unsafe { collection.GetCount() }.map_err(|e| api_err("GetCount", e))?;

      let mut endpoints = Vec::with_capacity(count as usize);
      for i in 0..count {
         let device = unsafe { collection.Item(i) }.map_err(|e| api_err("Item", e))?;
         match describe_endpoint(&device) {
            Ok(desc) => endpoints.push(desc),
            Err(e) => warn!("Skipping endpoint {i}: {e}"),
         }
      }
      Ok(endpoints)
   }

   fn connector_peers(&self, endpoint_id: &str) -> Result<Vec<Option<SmolStr>>> {
      let _com = ComGuard::new();
      let enumerator = Self::enumerator()?;
      let device = Self::device_by_path(&enumerator, endpoint_id)?;

      let topology: IDeviceTopology =
         unsafe { device.Activate(CLSCTX_ALL, None) }.map_err(|e| api_err("Activate", e))?;
      let count = unsafe { topology.GetConnectorCount() }
         .map_err(|e| api_err("GetConnectorCount", e))?;

      let mut peers = Vec::with_capacity(count as usize);
      for i in 0..count {
         let connector = unsafe { topology.GetConnector(i) }
            .map_err(|e| api_err("GetConnector", e))?;
         peers.push(adjacent_device_path(&connector)?);
      }
      Ok(peers)
   }

   fn open_control(&self, device_path: &str) -> Result<Option<ControlHandle>> {
      let _com = ComGuard::new();
      let enumerator = Self::enumerator()?;
      let device = Self::device_by_path(&enumerator, device_path)?;

      let control: IKsControl = match unsafe { device.Activate(CLSCTX_ALL, None) } {
         Ok(control) => control,
         Err(e) => {
            debug!("{device_path} has no IKsControl: {e}");
            return Ok(None);
         },
      };

      // Not every kernel-streaming filter speaks the Bluetooth oneshot set.
      if !supports_oneshot(&control) {
         return Ok(None);
      }
      Ok(Some(Arc::new(KsOneshotControl { control }) as ControlHandle))
   }
}

fn describe_endpoint(device: &IMMDevice) -> Result<EndpointDesc> {
   let id = unsafe { device.GetId() }
      .map_err(|e| api_err("GetId", e))
      .and_then(|p| unsafe { p.to_string() }.map_err(|_| BlueTrayError::Parse(
         crate::error::ParseError::InvalidName,
      )))?;

   let state = unsafe { device.GetState() }.map_err(|e| api_err("GetState", e))?;
   let state = EndpointState::from_repr(state.0).unwrap_or(EndpointState::NotPresent);

   let store = unsafe { device.OpenPropertyStore(STGM_READ) }
      .map_err(|e| api_err("OpenPropertyStore", e))?;
   let name = unsafe { store.GetValue(&PKEY_Device_FriendlyName) }
      .map_err(|e| api_err("GetValue", e))?
      .to_string();
   let container = unsafe { store.GetValue(&PKEY_Device_ContainerId) }
      .map_err(|e| api_err("GetValue", e))?
      .to_string();
   let container = Uuid::parse_str(container.trim_start_matches('{').trim_end_matches('}'))
      .map_err(|_| BlueTrayError::Parse(crate::error::ParseError::InvalidName))?;

   Ok(EndpointDesc {
      id: id.into(),
      name: name.into(),
      container: ContainerId(container),
      state,
   })
}

/// Resolves the device path of the node on the far side of a connector, or
/// `None` when the connector is unwired.
fn adjacent_device_path(connector: &IConnector) -> Result<Option<SmolStr>> {
   let connected = unsafe { connector.IsConnected() }
      .map_err(|e| api_err("IsConnected", e))?;
   if !connected.as_bool() {
      return Ok(None);
   }

   let other = unsafe { connector.GetConnectedTo() }
      .map_err(|e| api_err("GetConnectedTo", e))?;
   let part: IPart = other.cast().map_err(|e| api_err("cast IPart", e))?;
   let topology = unsafe { part.GetTopologyObject() }
      .map_err(|e| api_err("GetTopologyObject", e))?;
   let path = unsafe { topology.GetDeviceId() }
      .map_err(|e| api_err("GetDeviceId", e))
      .and_then(|p| {
         unsafe { p.to_string() }
            .map_err(|_| BlueTrayError::Parse(crate::error::ParseError::InvalidName))
      })?;
   Ok(Some(path.into()))
}

fn ks_property(id: u32, flags: u32) -> KSIDENTIFIER {
   KSIDENTIFIER {
      Anonymous: KSIDENTIFIER_0 {
         Anonymous: KSIDENTIFIER_0_0 {
            Set: KSPROPSETID_BTAUDIO,
            Id: id,
            Flags: flags,
         },
      },
   }
}

fn supports_oneshot(control: &IKsControl) -> bool {
   let prop = ks_property(KSPROPERTY_ONESHOT_RECONNECT, KSPROPERTY_TYPE_BASICSUPPORT);
   let mut support = 0u32;
   let mut returned = 0u32;
   unsafe {
      control
         .KsProperty(
            &prop,
            mem::size_of::<KSIDENTIFIER>() as u32,
            (&raw mut support).cast::<c_void>(),
            mem::size_of::<u32>() as u32,
            &mut returned,
         )
         .is_ok()
   }
}

/// IKsControl obtained in the multithreaded apartment; usable from any
/// blocking-pool thread.
struct KsOneshotControl {
   control: IKsControl,
}

unsafe impl Send for KsOneshotControl {}
unsafe impl Sync for KsOneshotControl {}

impl OneshotControl for KsOneshotControl {
   fn oneshot(&self, command: OneshotCommand) -> Result<()> {
      let _com = ComGuard::new();
      let id = match command {
         OneshotCommand::Reconnect => KSPROPERTY_ONESHOT_RECONNECT,
         OneshotCommand::Disconnect => KSPROPERTY_ONESHOT_DISCONNECT,
      };
      let prop = ks_property(id, KSPROPERTY_TYPE_GET);
      let mut value = 0u32;
      let mut returned = 0u32;
      unsafe {
         self
            .control
            .KsProperty(
               &prop,
               mem::size_of::<KSIDENTIFIER>() as u32,
               (&raw mut value).cast::<c_void>(),
               mem::size_of::<u32>() as u32,
               &mut returned,
            )
            .map_err(|e| api_err("KsProperty", e))
      }
   }
}

impl ContainerSource for WindowsPlatform {
   fn containers(&self) -> Result<Vec<(ContainerId, SmolStr)>> {
      let props: IIterable<HSTRING> = Vec::<HSTRING>::new()
         .try_into()
         .map_err(|e| api_err("IIterable", e))?;
      let found = DeviceInformation::FindAllAsyncWithKindAqsFilterAndRequestedProperties(
         &HSTRING::new(),
         &props,
         DeviceInformationKind::DeviceContainer,
      )
      .and_then(|op| op.get())
      .map_err(|e| api_err("FindAllAsync", e))?;

      let mut containers = Vec::with_capacity(found.Size().unwrap_or_default() as usize);
      for info in &found {
         let id = info.Id().map_err(|e| api_err("Id", e))?.to_string();
         let Ok(uuid) = Uuid::parse_str(id.trim_start_matches('{').trim_end_matches('}'))
         else {
            warn!("Container id is not a GUID: {id}");
            continue;
         };
         let name = info.Name().map_err(|e| api_err("Name", e))?.to_string();
         containers.push((ContainerId(uuid), SmolStr::new(name)));
      }
      Ok(containers)
   }
}

impl SdpSource for WindowsPlatform {
   fn service_records(&self, address: Address) -> Result<Vec<Vec<u8>>> {
      let context: Vec<u16> = format!("({address})").encode_utf16().chain(Some(0)).collect();
      let mut class = L2CAP_PROTOCOL;
      let mut query = WSAQUERYSETW {
         dwSize: mem::size_of::<WSAQUERYSETW>() as u32,
         dwNameSpace: NS_BTH,
         lpszContext: windows::core::PWSTR(context.as_ptr().cast_mut()),
         lpServiceClassId: &mut class,
         ..Default::default()
      };

      let mut lookup = windows::Win32::Foundation::HANDLE::default();
      let rc = unsafe {
         WSALookupServiceBeginW(&query, LUP_FLUSHCACHE | LUP_RETURN_BLOB, &mut lookup)
      };
      if rc != 0 {
         let code = unsafe { WSAGetLastError() };
         return Err(BlueTrayError::SystemApi {
            op: "WSALookupServiceBegin",
            code: code.0,
         });
      }

      let mut records = Vec::new();
      loop {
         let fetched = probe_then_fetch(SDP_PROBE_SIZE, |buf| {
            let mut len = buf.len() as u32;
            let rc = unsafe {
               WSALookupServiceNextW(
                  lookup,
                  LUP_RETURN_BLOB,
                  &mut len,
                  buf.as_mut_ptr().cast::<WSAQUERYSETW>(),
               )
            };
            if rc == 0 {
               return AttemptStatus::Done { len: len as usize };
            }
            match unsafe { WSAGetLastError() } {
               WSAEFAULT => AttemptStatus::ShortBuffer {
                  required: len as usize,
               },
               WSA_E_NO_MORE => AttemptStatus::Failed(BlueTrayError::LookupEnded),
               code => AttemptStatus::Failed(BlueTrayError::SystemApi {
                  op: "WSALookupServiceNext",
                  code: code.0,
               }),
            }
         });

         match fetched {
            Ok(buf) => {
               let result = buf.as_ptr().cast::<WSAQUERYSETW>();
               let blob = unsafe { (*result).lpBlob };
               if blob.is_null() {
                  continue;
               }
               let bytes = unsafe {
                  std::slice::from_raw_parts((*blob).pBlobData, (*blob).cbSize as usize)
               };
               records.push(bytes.to_vec());
            },
            Err(BlueTrayError::LookupEnded) => break,
            Err(e) => {
               unsafe { WSALookupServiceEnd(lookup) };
               return Err(e);
            },
         }
      }

      unsafe { WSALookupServiceEnd(lookup) };
      Ok(records)
   }
}

// === Watch stream ===

/// AEP device watch deltas as a stream; stops the underlying watcher when
/// dropped.
pub struct WatchDeltaStream {
   watcher: AepWatcher,
   rx: mpsc::Receiver<WatchDelta>,
}

impl Stream for WatchDeltaStream {
   type Item = WatchDelta;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<WatchDelta>> {
      Pin::new(&mut self.rx).poll_next(cx)
   }
}

impl Drop for WatchDeltaStream {
   fn drop(&mut self) {
      if let Err(e) = self.watcher.Stop() {
         warn!("Failed to stop device watcher: {e}");
      }
   }
}

fn map_bool_property(info: &DeviceInformation, key: &str) -> Option<bool> {
   let value = info.Properties().ok()?.Lookup(&HSTRING::from(key)).ok()?;
   value.cast::<IPropertyValue>().ok()?.GetBoolean().ok()
}

fn update_properties(update: &DeviceInformationUpdate) -> Vec<(SmolStr, registry::PropValue)> {
   let Ok(map) = update.Properties() else {
      return Vec::new();
   };
   let mut properties = Vec::new();
   for kv in &map {
      let Ok(key) = kv.Key() else { continue };
      let key = key.to_string();
      let Ok(value) = kv.Value() else { continue };
      let Ok(value) = value.cast::<IPropertyValue>() else {
         continue;
      };
      let value = match key.as_str() {
         registry::PROP_NAME => value.GetString().ok().map(|s| {
            registry::PropValue::Text(SmolStr::new(s.to_string()))
         }),
         registry::PROP_CAN_PAIR | registry::PROP_IS_PAIRED => {
            value.GetBoolean().ok().map(registry::PropValue::Flag)
         },
         _ => None,
      };
      if let Some(value) = value {
         properties.push((SmolStr::new(key), value));
      }
   }
   properties
}

/// Starts an AEP watcher over Bluetooth devices and exposes its callbacks as
/// a delta stream.
pub fn watch_deltas(capacity: usize) -> Result<WatchDeltaStream> {
   let requested: IIterable<HSTRING> = vec![
      HSTRING::from(registry::PROP_CAN_PAIR),
      HSTRING::from(registry::PROP_IS_PAIRED),
   ]
   .try_into()
   .map_err(|e| api_err("IIterable", e))?;

   let watcher = DeviceInformation::CreateWatcherWithKindAqsFilterAndRequestedProperties(
      &HSTRING::from(AEP_BLUETOOTH_FILTER),
      &requested,
      DeviceInformationKind::AssociationEndpoint,
   )
   .map_err(|e| api_err("CreateWatcher", e))?;

   let (tx, rx) = mpsc::channel(capacity);

   let added_tx = tx.clone();
   watcher
      .Added(&TypedEventHandler::new(
         move |_, info: windows::core::Ref<'_, DeviceInformation>| {
            if let Some(info) = info.as_ref() {
               let delta = WatchDelta::Added {
                  id: SmolStr::new(info.Id()?.to_string()),
                  name: SmolStr::new(info.Name()?.to_string()),
                  can_pair: map_bool_property(info, registry::PROP_CAN_PAIR)
                     .unwrap_or_default(),
                  is_paired: map_bool_property(info, registry::PROP_IS_PAIRED)
                     .unwrap_or_default(),
               };
               if added_tx.clone().try_send(delta).is_err() {
                  warn!("Watch channel overflow on add");
               }
            }
            Ok(())
         },
      ))
      .map_err(|e| api_err("Added", e))?;

   let updated_tx = tx.clone();
   watcher
      .Updated(&TypedEventHandler::new(
         move |_, update: windows::core::Ref<'_, DeviceInformationUpdate>| {
            if let Some(update) = update.as_ref() {
               let delta = WatchDelta::Updated {
                  id: SmolStr::new(update.Id()?.to_string()),
                  properties: update_properties(update),
               };
               if updated_tx.clone().try_send(delta).is_err() {
                  warn!("Watch channel overflow on update");
               }
            }
            Ok(())
         },
      ))
      .map_err(|e| api_err("Updated", e))?;

   let removed_tx = tx;
   watcher
      .Removed(&TypedEventHandler::new(
         move |_, update: windows::core::Ref<'_, DeviceInformationUpdate>| {
            if let Some(update) = update.as_ref() {
               let delta = WatchDelta::Removed {
                  id: SmolStr::new(update.Id()?.to_string()),
               };
               if removed_tx.clone().try_send(delta).is_err() {
                  warn!("Watch channel overflow on remove");
               }
            }
            Ok(())
         },
      ))
      .map_err(|e| api_err("Removed", e))?;

   watcher.Start().map_err(|e| api_err("Start", e))?;
   Ok(WatchDeltaStream { watcher, rx })
}

// === Broadcast window ===

static BROADCAST_TX: OnceLock<mpsc::UnboundedSender<Vec<u8>>> = OnceLock::new();

unsafe extern "system" fn broadcast_wnd_proc(
   hwnd: HWND,
   msg: u32,
   wparam: WPARAM,
   lparam: LPARAM,
) -> LRESULT {
   if msg == WM_DEVICECHANGE && lparam.0 != 0 {
      let hdr = lparam.0 as *const DEV_BROADCAST_HDR;
      let size = unsafe { (*hdr).dbch_size } as usize;
      let bytes = unsafe { std::slice::from_raw_parts(lparam.0 as *const u8, size) }.to_vec();
      if let Some(tx) = BROADCAST_TX.get() {
         let _ = tx.unbounded_send(bytes);
      }
   }
   unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

/// Spins up a message-only window subscribed to Bluetooth port device
/// notifications and yields the raw broadcast payloads.
pub fn broadcast_payloads() -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
   let (tx, rx) = mpsc::unbounded();
   BROADCAST_TX
      .set(tx)
      .map_err(|_| BlueTrayError::SystemApi {
         op: "broadcast window",
         code: -1,
      })?;

   thread::spawn(|| {
      if let Err(e) = run_broadcast_window() {
         warn!("Broadcast window failed: {e}");
      }
   });
   Ok(rx)
}

fn run_broadcast_window() -> Result<()> {
   unsafe {
      let instance = GetModuleHandleW(None).map_err(|e| api_err("GetModuleHandle", e))?;
      let class = WNDCLASSW {
         lpfnWndProc: Some(broadcast_wnd_proc),
         hInstance: instance.into(),
         lpszClassName: w!("bluetrayd-broadcast"),
         ..Default::default()
      };
      if RegisterClassW(&class) == 0 {
         return Err(BlueTrayError::SystemApi {
            op: "RegisterClass",
            code: -1,
         });
      }

      let hwnd = CreateWindowExW(
         WINDOW_EX_STYLE(0),
         w!("bluetrayd-broadcast"),
         w!("bluetrayd"),
         WINDOW_STYLE(0),
         0,
         0,
         0,
         0,
         HWND_MESSAGE,
         None,
         instance,
         None,
      )
      .map_err(|e| api_err("CreateWindowEx", e))?;

      let filter = DEV_BROADCAST_DEVICEINTERFACE_W {
         dbcc_size: mem::size_of::<DEV_BROADCAST_DEVICEINTERFACE_W>() as u32,
         dbcc_devicetype: 5, // DBT_DEVTYP_DEVICEINTERFACE
         dbcc_classguid: GUID_BTHPORT_DEVICE_INTERFACE,
         ..Default::default()
      };
      RegisterDeviceNotificationW(
         windows::Win32::Foundation::HANDLE(hwnd.0),
         (&raw const filter).cast::<c_void>(),
         DEVICE_NOTIFY_WINDOW_HANDLE,
      )
      .map_err(|e| api_err("RegisterDeviceNotification", e))?;

      let mut msg = MSG::default();
      while GetMessageW(&mut msg, None, 0, 0).as_bool() {
         DispatchMessageW(&msg);
      }
   }
   Ok(())
}
