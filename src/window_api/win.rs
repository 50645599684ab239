use std::{cell::RefCell, ffi::c_void, sync::Arc, thread::JoinHandle};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{CloseHandle, BOOL, HANDLE, HMODULE, HWND},
        System::{
            SystemInformation::GetTickCount64,
            Threading::{
                OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
                PROCESS_QUERY_LIMITED_INFORMATION,
            },
        },
        UI::{
            Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK},
            Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO},
            WindowsAndMessaging::{
                DispatchMessageW, GetForegroundWindow, GetMessageW, GetWindowThreadProcessId,
                PostQuitMessage, TranslateMessage, EVENT_OBJECT_FOCUS,
                EVENT_OBJECT_LOCATIONCHANGE, MSG, WINEVENT_OUTOFCONTEXT,
            },
        },
    },
};

use super::{WindowHandle, WindowManager};
use crate::daemon::{
    collection::{collector::forward, event::WindowEvent, event::WindowEventKind, EVENT_THREAD_NAME},
    tracker::SessionEvent,
};

fn to_hwnd(window: WindowHandle) -> HWND {
    HWND(window.0 as usize as *mut c_void)
}

fn from_hwnd(window: HWND) -> WindowHandle {
    WindowHandle(window.0 as usize as u64)
}

#[tracing::instrument]
pub fn get_active() -> Result<WindowHandle> {
    let window = unsafe { GetForegroundWindow() };
    if window.is_invalid() {
        return Err(anyhow!("Failed to get foreground window"));
    }
    Ok(from_hwnd(window))
}

#[tracing::instrument]
pub fn get_process_path(window: WindowHandle) -> Result<Arc<str>> {
    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(to_hwnd(window), Some(&mut id)) };
    if id == 0 {
        return Err(anyhow!("Window {window:?} has no owning process"));
    }
    let process_handle =
        unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), id) }
            .inspect_err(|e| error!("Failed to open process {e:?}"))?;

    let mut text: [u16; 4096] = [0; 4096];
    let path = unsafe { query_image_name(process_handle, &mut text) };

    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;
    Ok(path?.into())
}

unsafe fn query_image_name(process_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

pub fn get_idle_time() -> Result<u32> {
    let mut last: LASTINPUTINFO = LASTINPUTINFO {
        cbSize: size_of::<LASTINPUTINFO>() as u32,
        dwTime: 0,
    };
    let is_success = unsafe { GetLastInputInfo(&mut last) };
    if !is_success.as_bool() {
        error!("Failed to retrieve user idle time");
        return Err(anyhow!("Failed to retrieve user idle time"));
    }

    let tick_count = unsafe { GetTickCount64() };
    let duration = tick_count - last.dwTime as u64;
    Ok(duration.min(u32::MAX as u64) as u32)
}

pub struct WindowsWindowManager {}

impl WindowsWindowManager {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowManager for WindowsWindowManager {
    fn get_active_window(&mut self) -> Result<WindowHandle> {
        get_active().inspect_err(|e| error!("Failed to get active window {e:?}"))
    }

    fn resolve_process_path(&mut self, window: WindowHandle) -> Result<Arc<str>> {
        get_process_path(window)
    }

    fn get_idle_time(&mut self) -> Result<u32> {
        get_idle_time().inspect_err(|e| error!("Failed to get idle time {e:?}"))
    }
}

struct HookState {
    manager: WindowsWindowManager,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

thread_local! {
    // Win event callbacks carry no user data, so the hook thread keeps its state here.
    static HOOK_STATE: RefCell<Option<HookState>> = const { RefCell::new(None) };
}

unsafe extern "system" fn on_win_event(
    _hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    _id_object: i32,
    _id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    let kind = match event {
        EVENT_OBJECT_FOCUS => WindowEventKind::FocusChanged,
        EVENT_OBJECT_LOCATIONCHANGE => WindowEventKind::LocationChanged,
        _ => return,
    };
    if hwnd.is_invalid() {
        return;
    }
    HOOK_STATE.with_borrow_mut(|state| {
        let Some(state) = state else {
            return;
        };
        let event = WindowEvent {
            kind,
            window: from_hwnd(hwnd),
        };
        if state.shutdown.is_cancelled() || !forward(&mut state.manager, &state.events, event) {
            unsafe { PostQuitMessage(0) };
        }
    });
}

/// Installs a focus/location hook on a dedicated thread and pumps its message loop until
/// shutdown is requested or the tracker goes away.
pub fn spawn_event_hook(
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    Ok(std::thread::Builder::new()
        .name(EVENT_THREAD_NAME.into())
        .spawn(move || {
            HOOK_STATE.set(Some(HookState {
                manager: WindowsWindowManager::new(),
                events,
                shutdown,
            }));
            let hook = unsafe {
                SetWinEventHook(
                    EVENT_OBJECT_FOCUS,
                    EVENT_OBJECT_LOCATIONCHANGE,
                    HMODULE::default(),
                    Some(on_win_event),
                    0,
                    0,
                    WINEVENT_OUTOFCONTEXT,
                )
            };
            if hook.is_invalid() {
                error!("Failed to install window event hook");
                return;
            }
            info!("Window event hook installed");

            let mut message = MSG::default();
            while unsafe { GetMessageW(&mut message, HWND::default(), 0, 0) }.as_bool() {
                unsafe {
                    let _ = TranslateMessage(&message);
                    DispatchMessageW(&message);
                }
            }

            let _ = unsafe { UnhookWinEvent(hook) };
            HOOK_STATE.set(None);
            info!("Window event hook removed");
        })?)
}
